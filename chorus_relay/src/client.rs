// TCP client for a relay server.
//
// `RelayClient::connect` opens the socket on the calling thread, switches it
// to non-blocking, and spawns one poll thread. Each tick that thread:
// - retries any output still queued behind a full send buffer,
// - makes one `try_receive` attempt,
// - on a broadcast, calls the application handler with `(sender, object)`.
//
// The handler only ever runs on the poll thread, one call at a time, and is
// called after the stream lock is released.
//
// `send` writes from the caller's thread. The stream is shared with the poll
// thread behind a mutex; both sides only do non-blocking I/O while holding it.
//
// Disconnects are not reported through a callback. When the server goes away
// the poll thread simply stops; applications that care can check
// `is_running()`. `close()` is still safe afterwards and releases the socket.

use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chorus_protocol::{Address, Broadcast, ObjectStream, Received};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::control::{LoopControl, LoopState, StoppedOnDrop};
use crate::error::RelayError;

type SharedStream = Arc<Mutex<ObjectStream<TcpStream>>>;

fn lock(stream: &Mutex<ObjectStream<TcpStream>>) -> MutexGuard<'_, ObjectStream<TcpStream>> {
    stream.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one connection to a relay server.
///
/// Dropping the handle closes the connection.
pub struct RelayClient {
    address: Address,
    server: Address,
    stream: SharedStream,
    control: Arc<LoopControl>,
    thread: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect with the default poll interval. `handler` is called with the
    /// sender address and object of every broadcast the server relays,
    /// including this client's own messages.
    pub fn connect<T, F>(server: &Address, handler: F) -> Result<Self, RelayError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Address, T) + Send + 'static,
    {
        Self::connect_with(ClientConfig::default(), server, handler)
    }

    pub fn connect_with<T, F>(
        config: ClientConfig,
        server: &Address,
        handler: F,
    ) -> Result<Self, RelayError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Address, T) + Send + 'static,
    {
        let stream = match config.connect_timeout {
            Some(timeout) => connect_timeout(server, timeout)?,
            None => TcpStream::connect(server).map_err(|source| RelayError::Connect {
                address: server.clone(),
                source,
            })?,
        };
        stream.set_nonblocking(true).map_err(RelayError::Socket)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%server, error = %e, "could not set TCP_NODELAY");
        }
        let address = Address::from(stream.local_addr().map_err(RelayError::Socket)?);

        let stream: SharedStream = Arc::new(Mutex::new(ObjectStream::new(stream)));
        let control = Arc::new(LoopControl::new());
        let thread = thread::Builder::new()
            .name(format!("chorus-relay-client-{}", address.port))
            .spawn({
                let stream = Arc::clone(&stream);
                let control = Arc::clone(&control);
                move || run_client(&stream, &control, config.poll_interval, handler)
            })
            .map_err(RelayError::Spawn)?;

        info!(local = %address, %server, "connected to relay");
        Ok(Self {
            address,
            server: server.clone(),
            stream,
            control,
            thread: Some(thread),
        })
    }

    /// Encode and send one object to the server. Fire-and-forget.
    ///
    /// Fails with `RelayError::Closed` once the poll loop has stopped, either
    /// through `close()` or because the server went away.
    pub fn send<M: Serialize + ?Sized>(&self, obj: &M) -> Result<(), RelayError> {
        if !self.control.is_running() {
            return Err(RelayError::Closed);
        }
        lock(&self.stream).send(obj)?;
        Ok(())
    }

    /// Local endpoint of this connection; the address the server tags this
    /// client's broadcasts with.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn server_address(&self) -> &Address {
        &self.server
    }

    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    /// False once the loop has stopped, whether by `close()` or because the
    /// server closed the connection.
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Stop the poll loop, wait for it, then close the socket. Calling it
    /// again is a no-op.
    pub fn close(&mut self) {
        self.control.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(local = %self.address, "relay client poll thread panicked");
            }
            let _ = lock(&self.stream).get_ref().shutdown(Shutdown::Both);
            info!(local = %self.address, "disconnected from relay");
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Try each resolved address in turn, bounding every attempt by `timeout`.
fn connect_timeout(server: &Address, timeout: Duration) -> Result<TcpStream, RelayError> {
    let connect_error = |source: io::Error| RelayError::Connect {
        address: server.clone(),
        source,
    };
    let mut last_error = None;
    for addr in server.to_socket_addrs().map_err(connect_error)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(source) => connect_error(source),
        None => RelayError::Resolve(server.clone()),
    })
}

/// Client poll loop. Runs until the control leaves `Running` or the server
/// closes the connection.
fn run_client<T, F>(
    stream: &Mutex<ObjectStream<TcpStream>>,
    control: &LoopControl,
    poll_interval: Duration,
    mut handler: F,
) where
    T: DeserializeOwned,
    F: FnMut(Address, T),
{
    let _stopped = StoppedOnDrop(control);

    while control.is_running() {
        let received = {
            let mut stream = lock(stream);
            if let Err(e) = stream.flush_pending() {
                warn!(error = %e, "relay connection failed");
                break;
            }
            stream.try_receive::<Broadcast<T>>()
        };

        match received {
            Ok(Received::NoneReady) => {}
            Ok(Received::Object(broadcast)) => {
                let (from, obj) = broadcast.into_parts();
                debug!(%from, "received broadcast");
                handler(from, obj);
            }
            Ok(Received::PeerClosed) => {
                info!("relay server closed the connection");
                break;
            }
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "relay connection failed");
                break;
            }
            Err(e) => warn!(error = %e, "skipping undecodable broadcast"),
        }

        control.sleep(poll_interval);
    }
}
