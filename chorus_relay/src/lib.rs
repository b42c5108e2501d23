// chorus_relay: broadcast relay server and client.
//
// The relay is a thin fan-out: every object a client sends is re-sent to
// every connected client, the sender included, tagged with the sender's
// address. No routing, history, or authentication. Intended for small groups
// of actors sharing state snapshots.
//
// Module overview:
// - `server.rs`:   `RelayServer`, the listener handle and its poll loop.
// - `registry.rs`: Connected-client registry driven by the server loop:
//                  accept, drain, reap, broadcast.
// - `client.rs`:   `RelayClient`, one connection plus a poll loop that hands
//                  every broadcast to an application callback.
// - `control.rs`:  `LoopState` and the Running/Stopping/Stopped machinery
//                  shared by both loops.
// - `config.rs`:   `ServerConfig`, `ClientConfig`, TOML loading.
// - `error.rs`:    `RelayError`, `ConfigError`.
//
// Threading: one background thread per server or client, never one per
// connection. Sockets are non-blocking and each loop wakes once per poll
// interval, so any event (connect, message, disconnect) is handled within
// about one interval.
//
// Dependencies: `chorus_protocol` (framing, object streams, addresses).

pub mod client;
pub mod config;
mod control;
pub mod error;
mod registry;
pub mod server;

pub use chorus_protocol::Address;
pub use client::RelayClient;
pub use config::{ClientConfig, ServerConfig};
pub use control::LoopState;
pub use error::{ConfigError, RelayError};
pub use server::RelayServer;
