// Server-side registry of connected clients.
//
// `Registry` is owned by the server's poll thread and mutated only from there,
// so it has no internal locking. Each method is one step of a poll iteration
// (see `server.rs`):
//
// - `accept`:        at most one non-blocking accept per call.
// - `drain`:         one `try_receive` per client, collecting broadcasts and
//                    the addresses of clients whose peer closed.
// - `reap`:          shut down and remove the given clients.
// - `broadcast`:     encode each message once and queue it on every client,
//                    including the sender. Returns clients whose write failed.
// - `flush_pending`: retry output left queued by a full send buffer.
//
// A fatal stream error on one client never interrupts work on the others;
// that client is reported back so the caller can reap it. That includes a
// client whose queued output passes the pending limit because it stopped
// reading.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};

use chorus_protocol::{Address, Broadcast, ObjectStream, RawBroadcast, Received, encode_object};
use serde_json::Value;
use tracing::{debug, info, warn};

/// One accepted connection.
struct ClientEntry {
    address: Address,
    stream: ObjectStream<TcpStream>,
}

impl ClientEntry {
    fn close(self) {
        // NotConnected is expected when the peer already hung up.
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
        info!(address = %self.address, "client disconnected");
    }
}

pub(crate) struct Registry {
    clients: HashMap<Address, ClientEntry>,
    max_pending_bytes: usize,
}

impl Registry {
    pub(crate) fn new(max_pending_bytes: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_pending_bytes,
        }
    }

    pub(crate) fn addresses(&self) -> BTreeSet<Address> {
        self.clients.keys().cloned().collect()
    }

    /// Accept one pending connection, if any. Returns true if a client was
    /// added.
    pub(crate) fn accept(&mut self, listener: &TcpListener) -> bool {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return false;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "could not make accepted socket non-blocking");
            return false;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }

        let address = Address::from(peer);
        info!(%address, "client connected");
        let entry = ClientEntry {
            address: address.clone(),
            stream: ObjectStream::new(stream).with_pending_limit(self.max_pending_bytes),
        };
        if let Some(stale) = self.clients.insert(address, entry) {
            stale.close();
        }
        true
    }

    /// Poll every client once. Returns the objects received, tagged with
    /// their sender, and the clients that should be reaped.
    pub(crate) fn drain(&mut self) -> (Vec<RawBroadcast>, Vec<Address>) {
        let mut messages = Vec::new();
        let mut dead = Vec::new();
        for entry in self.clients.values_mut() {
            match entry.stream.try_receive::<Value>() {
                Ok(Received::NoneReady) => {}
                Ok(Received::Object(obj)) => {
                    debug!(from = %entry.address, "received object");
                    messages.push(Broadcast(entry.address.clone(), obj));
                }
                Ok(Received::PeerClosed) => dead.push(entry.address.clone()),
                Err(e) if e.is_fatal() => {
                    warn!(address = %entry.address, error = %e, "dropping client");
                    dead.push(entry.address.clone());
                }
                Err(e) => {
                    warn!(address = %entry.address, error = %e, "skipping undecodable object");
                }
            }
        }
        (messages, dead)
    }

    /// Close and remove the given clients. Returns true if any were present.
    pub(crate) fn reap(&mut self, dead: &[Address]) -> bool {
        let mut changed = false;
        for address in dead {
            if let Some(entry) = self.clients.remove(address) {
                entry.close();
                changed = true;
            }
        }
        changed
    }

    /// Send every message, in order, to every registered client. Returns the
    /// clients whose transport failed; they are skipped for the rest of the
    /// batch.
    pub(crate) fn broadcast(&mut self, messages: &[RawBroadcast]) -> Vec<Address> {
        let mut failed = Vec::new();
        for message in messages {
            let frame = match encode_object(message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(from = %message.sender(), error = %e, "could not encode broadcast");
                    continue;
                }
            };
            for entry in self.clients.values_mut() {
                if failed.contains(&entry.address) {
                    continue;
                }
                if let Err(e) = entry.stream.send_frame(&frame) {
                    warn!(address = %entry.address, error = %e, "broadcast write failed");
                    failed.push(entry.address.clone());
                }
            }
            debug!(from = %message.sender(), targets = self.clients.len(), "broadcast");
        }
        failed
    }

    /// Retry queued output on every client. Returns clients whose transport
    /// failed.
    pub(crate) fn flush_pending(&mut self) -> Vec<Address> {
        let mut failed = Vec::new();
        for entry in self.clients.values_mut() {
            if entry.stream.pending_bytes() == 0 {
                continue;
            }
            if let Err(e) = entry.stream.flush_pending() {
                warn!(address = %entry.address, error = %e, "flush failed");
                failed.push(entry.address.clone());
            }
        }
        failed
    }

    /// Close every client transport.
    pub(crate) fn close_all(&mut self) {
        for (_, entry) in self.clients.drain() {
            entry.close();
        }
    }
}
