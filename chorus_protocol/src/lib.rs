// chorus_protocol: wire protocol for the Chorus broadcast relay.
//
// This crate defines the framing, the duplex object stream, and the address
// and envelope types shared by the relay server and its clients. It spawns no
// threads and owns no sockets; everything operates on a caller-supplied
// `Read + Write` transport.
//
// Module overview:
// - `types.rs`:    `Address`, the `(host, port)` endpoint value.
// - `framing.rs`:  Length-delimited framing: 4-byte big-endian length prefix,
//                  then JSON payload. Blocking and buffer-oriented helpers.
// - `stream.rs`:   `ObjectStream`, sends/receives whole serde objects over a
//                  non-blocking transport with a three-way receive outcome.
// - `message.rs`:  `Broadcast`, the `(sender, object)` envelope the relay
//                  fans out.
// - `error.rs`:    `StreamError`.
//
// Design decisions:
// - **JSON serialization.** Any `Serialize`/`DeserializeOwned` type can be
//   relayed, and the relay can forward payloads as `serde_json::Value`
//   without knowing the application schema.
// - **Explicit length prefix.** JSON does not mark object boundaries on a
//   byte stream, so framing supplies them. "Incomplete" is then a simple
//   buffer-length check and never confused with "corrupt".
// - **No async runtime.** Plain `std::io::Read`/`Write`.

pub mod error;
pub mod framing;
pub mod message;
pub mod stream;
pub mod types;

pub use error::StreamError;
pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{Broadcast, RawBroadcast};
pub use stream::{MAX_PENDING_BYTES, ObjectStream, Received, encode_object};
pub use types::{Address, AddressParseError};
