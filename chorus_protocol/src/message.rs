// Relay-to-client broadcast envelope.
//
// Clients send bare application objects; the relay wraps each one with the
// sender's address before fanning it out. On the wire this is a JSON array
// `[{"host": .., "port": ..}, object]`, i.e. the serde encoding of the tuple
// `(Address, T)`.
//
// The relay itself is schema-agnostic and works with `Broadcast<Value>`
// (see `RawBroadcast`); clients decode straight into their own `T`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Address;

/// One relayed object, tagged with the address of the client that sent it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Broadcast<T>(pub Address, pub T);

/// A broadcast whose payload has not been interpreted.
pub type RawBroadcast = Broadcast<Value>;

impl<T> Broadcast<T> {
    pub fn sender(&self) -> &Address {
        &self.0
    }

    pub fn into_parts(self) -> (Address, T) {
        (self.0, self.1)
    }
}
