// Relay server: listener plus a single background poll thread.
//
// Architecture: one dedicated thread per server, no per-connection threads.
// The listener and every accepted socket are non-blocking; the thread wakes
// once per poll interval and runs one iteration:
//
//   0. flush:     retry output still queued from earlier ticks
//   1. accept:    at most one new connection
//   2. drain:     one receive attempt per client
//   3. reap:      close clients whose peer closed (or whose transport failed)
//   4. broadcast: every message from step 2, in order, to every remaining
//                 client including its sender; failed targets are reaped
//                 right after
//
// The registry lives on the poll thread (see `registry.rs`). After any change
// the thread publishes the address set into a mutex-guarded roster, which is
// what `RelayServer::clients()` reads from the caller's thread. The snapshot
// can lag the registry by one iteration.
//
// Shutdown: `close()` flips the loop state to Stopping and wakes the thread,
// which finishes its current iteration, closes every client socket and the
// listener, and exits. `close()` returns after joining it.

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chorus_protocol::Address;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::control::{LoopControl, LoopState, StoppedOnDrop};
use crate::error::RelayError;
use crate::registry::Registry;

type Roster = Arc<Mutex<BTreeSet<Address>>>;

/// Handle to a running relay server.
///
/// Dropping the handle closes the server.
pub struct RelayServer {
    address: Address,
    roster: Roster,
    control: Arc<LoopControl>,
    thread: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind to `bind` and start relaying with the default poll interval.
    pub fn start(bind: Address) -> Result<Self, RelayError> {
        Self::start_with(ServerConfig {
            bind,
            ..ServerConfig::default()
        })
    }

    /// Bind and start the poll thread. The returned handle's `address()` is
    /// the address actually bound, so port 0 can be used to pick a free port.
    pub fn start_with(config: ServerConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.bind).map_err(|source| RelayError::Bind {
            address: config.bind.clone(),
            source,
        })?;
        listener.set_nonblocking(true).map_err(RelayError::Socket)?;
        let address = Address::from(listener.local_addr().map_err(RelayError::Socket)?);

        let roster = Roster::default();
        let control = Arc::new(LoopControl::new());
        let thread = thread::Builder::new()
            .name("chorus-relay-server".into())
            .spawn({
                let roster = Arc::clone(&roster);
                let control = Arc::clone(&control);
                move || run_server(listener, &config, &roster, &control)
            })
            .map_err(RelayError::Spawn)?;

        info!(%address, "relay listening");
        Ok(Self {
            address,
            roster,
            control,
            thread: Some(thread),
        })
    }

    /// The bound listen address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Snapshot of connected client addresses. May be up to one poll
    /// interval stale.
    pub fn clients(&self) -> BTreeSet<Address> {
        self.roster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    /// Stop the poll loop, wait for it, and release every socket. Calling it
    /// again is a no-op.
    pub fn close(&mut self) {
        self.control.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(address = %self.address, "relay poll thread panicked");
            }
            info!(address = %self.address, "relay closed");
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Main relay loop. Runs until the control leaves `Running`.
fn run_server(
    listener: TcpListener,
    config: &ServerConfig,
    roster: &Mutex<BTreeSet<Address>>,
    control: &LoopControl,
) {
    let _stopped = StoppedOnDrop(control);
    let mut registry = Registry::new(config.max_pending_bytes);

    while control.is_running() {
        if run_iteration(&mut registry, &listener) {
            publish(roster, &registry);
        }
        control.sleep(config.poll_interval);
    }

    registry.close_all();
    drop(listener);
    publish(roster, &registry);
    debug!("relay poll loop stopped");
}

/// One poll iteration. Returns true if the set of clients changed.
fn run_iteration(registry: &mut Registry, listener: &TcpListener) -> bool {
    let mut dead = registry.flush_pending();
    let mut changed = registry.accept(listener);

    let (messages, closed) = registry.drain();
    dead.extend(closed);
    changed |= registry.reap(&dead);

    let failed = registry.broadcast(&messages);
    changed |= registry.reap(&failed);
    changed
}

fn publish(roster: &Mutex<BTreeSet<Address>>, registry: &Registry) {
    *roster.lock().unwrap_or_else(PoisonError::into_inner) = registry.addresses();
}
