// Length-delimited message framing over TCP.
//
// Wire format: a 4-byte big-endian length prefix followed by the payload.
// JSON is not self-delimiting on a continuous byte stream, so every encoded
// object travels inside one frame. Two decoding styles are provided:
//
// - `read_message` / `write_message`: blocking helpers over any `Read` /
//   `Write`. Used by tools and tests that talk to the relay with a plain
//   blocking socket.
// - `encode_frame` / `peek_frame`: buffer-oriented helpers used by
//   `stream::ObjectStream`, which reads whatever a non-blocking socket has and
//   needs to ask "is there a whole frame at the front of this buffer yet?"
//   without consuming anything on a partial read.
//
// A `MAX_MESSAGE_SIZE` constant (16 MB) protects against unbounded allocation
// from malformed or malicious length prefixes.

use std::io::{self, Read, Write};
use std::ops::Range;

use crate::error::StreamError;

/// Maximum allowed message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

fn checked_len(len: usize) -> Option<u32> {
    u32::try_from(len).ok().filter(|&len| len <= MAX_MESSAGE_SIZE)
}

/// Write a length-delimited message: 4-byte big-endian length, then payload.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = msg.len();
    let Some(len32) = checked_len(len) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    };
    writer.write_all(&len32.to_be_bytes())?;
    writer.write_all(msg)?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited message: 4-byte big-endian length, then payload.
///
/// Returns `UnexpectedEof` if the stream closes cleanly before or during a
/// message. Returns `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Build a complete frame (prefix + payload) in memory.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, StreamError> {
    let len = payload.len();
    let len32 = checked_len(len).ok_or(StreamError::FrameTooLarge {
        size: len,
        max: MAX_MESSAGE_SIZE,
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&len32.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Look for one complete frame at the front of `buf`.
///
/// Returns the byte range of the payload when the whole frame is present, or
/// `None` when more bytes are needed. The frame occupies `..range.end`.
pub fn peek_frame(buf: &[u8]) -> Result<Option<Range<usize>>, StreamError> {
    let Some(header) = buf.first_chunk::<HEADER_LEN>() else {
        return Ok(None);
    };
    let len = u32::from_be_bytes(*header);
    if len > MAX_MESSAGE_SIZE {
        return Err(StreamError::FrameTooLarge {
            size: len as usize,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let end = HEADER_LEN + len as usize;
    if buf.len() < end {
        return Ok(None);
    }
    Ok(Some(HEADER_LEN..end))
}
