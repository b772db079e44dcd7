//! gRPC message framing.
//!
//! Messages are length-prefixed:
//! - 1 byte: compression flag (0 = uncompressed)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

/// Size of the message envelope (1 byte flag + 4 bytes length).
pub const ENVELOPE_SIZE: usize = 5;

/// Maximum message size accepted (4 MiB, the common gRPC default).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Wrap a message in the envelope. The compression flag is always 0.
pub fn encode_message(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ENVELOPE_SIZE + payload.len());
    buf.put_u8(0);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode one enveloped message from the front of `buf`.
///
/// Returns `Ok(Some((payload, compressed)))` when a complete message was
/// consumed, `Ok(None)` when more bytes are needed. A non-zero compression
/// flag is carried through, not decoded.
pub fn decode_message(buf: &mut BytesMut) -> io::Result<Option<(Bytes, bool)>> {
    if buf.len() < ENVELOPE_SIZE {
        return Ok(None);
    }

    let compressed = buf[0] != 0;
    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;

    if length > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", length),
        ));
    }

    if buf.len() < ENVELOPE_SIZE + length {
        return Ok(None);
    }

    buf.advance(ENVELOPE_SIZE);
    let payload = buf.split_to(length).freeze();
    Ok(Some((payload, compressed)))
}

/// Stateful decoder reassembling envelopes across DATA frame chunks.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes from a DATA frame.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete message.
    pub fn decode(&mut self) -> io::Result<Option<(Bytes, bool)>> {
        decode_message(&mut self.buffer)
    }

    /// Bytes sitting in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
