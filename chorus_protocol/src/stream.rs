// Duplex object stream: whole application objects over a raw byte transport.
//
// `ObjectStream<S>` wraps any `Read + Write` transport (in practice a
// non-blocking `TcpStream`) and exchanges serde objects as JSON payloads
// inside length-delimited frames (see `framing.rs`).
//
// Receiving never blocks and never treats a short read as an error. Bytes are
// accumulated in an inbound buffer until `framing::peek_frame` reports a whole
// frame, so each `try_receive` call yields exactly one of:
// - `Received::NoneReady`: nothing, or only part of a frame, has arrived.
// - `Received::Object(T)`: one frame decoded; the buffer advances past it.
// - `Received::PeerClosed`: end of input and no complete frame left.
//
// Sending appends the encoded frame to an outbound buffer and writes as much
// as the transport accepts. On a non-blocking socket with a full send buffer
// the remainder stays queued until `flush_pending` is called again; the owning
// poll loop does that once per tick. The queue is bounded (`MAX_PENDING_BYTES`
// by default): a send that would push it past the limit fails with the fatal
// `StreamError::Backlog`, so a peer that stops reading gets dropped instead of
// growing the queue forever.

use std::io::{self, Read, Write};
use std::ops::Range;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::StreamError;
use crate::framing::{MAX_MESSAGE_SIZE, encode_frame, peek_frame};

const READ_CHUNK: usize = 8 * 1024;

/// Default cap on bytes queued behind a full send buffer: four maximum-size
/// frames.
pub const MAX_PENDING_BYTES: usize = 4 * MAX_MESSAGE_SIZE as usize;

/// Outcome of a single non-blocking receive attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum Received<T> {
    NoneReady,
    Object(T),
    PeerClosed,
}

/// Encode `obj` as a complete frame, ready for `ObjectStream::send_frame`.
///
/// The relay server uses this to serialize each broadcast once and fan the
/// same bytes out to every client.
pub fn encode_object<T: Serialize + ?Sized>(obj: &T) -> Result<Vec<u8>, StreamError> {
    let payload = serde_json::to_vec(obj).map_err(StreamError::Encode)?;
    encode_frame(&payload)
}

/// Bidirectional object channel over a byte transport.
pub struct ObjectStream<S> {
    inner: S,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    pending_limit: usize,
    eof: bool,
}

impl<S: Read + Write> ObjectStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            inbound: Vec::new(),
            outbound: Vec::new(),
            pending_limit: MAX_PENDING_BYTES,
            eof: false,
        }
    }

    /// Replace the outbound queue limit.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Encode and send one object. Fire-and-forget: success means the bytes
    /// were handed to the transport or queued behind a full send buffer.
    pub fn send<T: Serialize + ?Sized>(&mut self, obj: &T) -> Result<(), StreamError> {
        let frame = encode_object(obj)?;
        self.send_frame(&frame)
    }

    /// Queue pre-encoded frame bytes (from `encode_object`) and flush.
    ///
    /// Fails with `StreamError::Backlog` if the frame does not fit under the
    /// pending limit even after flushing what the transport will take.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), StreamError> {
        if self.outbound.len() + frame.len() > self.pending_limit {
            self.flush_pending()?;
            let pending = self.outbound.len() + frame.len();
            if pending > self.pending_limit {
                return Err(StreamError::Backlog {
                    pending,
                    limit: self.pending_limit,
                });
            }
        }
        self.outbound.extend_from_slice(frame);
        self.flush_pending()
    }

    /// Write as much queued output as the transport will take right now.
    pub fn flush_pending(&mut self) -> Result<(), StreamError> {
        while !self.outbound.is_empty() {
            match self.inner.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        match self.inner.flush() {
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Bytes accepted by `send` but not yet written to the transport.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    /// Try to decode one object without blocking.
    ///
    /// A `StreamError::Decode` means one complete frame was consumed but did
    /// not deserialize as `T`; the stream is still usable. Any other error
    /// is fatal for the connection (see `StreamError::is_fatal`).
    pub fn try_receive<T: DeserializeOwned>(&mut self) -> Result<Received<T>, StreamError> {
        let range = match peek_frame(&self.inbound)? {
            Some(range) => range,
            None => match self.fill()? {
                Some(range) => range,
                None if self.eof => {
                    if !self.inbound.is_empty() {
                        warn!(
                            bytes = self.inbound.len(),
                            "peer closed mid-frame, discarding partial data"
                        );
                        self.inbound.clear();
                    }
                    return Ok(Received::PeerClosed);
                }
                None => return Ok(Received::NoneReady),
            },
        };

        let decoded: Result<T, _> = serde_json::from_slice(&self.inbound[range.clone()]);
        self.inbound.drain(..range.end);
        decoded.map(Received::Object).map_err(StreamError::Decode)
    }

    /// Read until a frame completes, the transport runs dry, or end of input.
    fn fill(&mut self) -> Result<Option<Range<usize>>, StreamError> {
        let mut chunk = [0u8; READ_CHUNK];
        while !self.eof {
            match self.inner.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    if let Some(range) = peek_frame(&self.inbound)? {
                        return Ok(Some(range));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}
