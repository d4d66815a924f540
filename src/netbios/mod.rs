//! NetBIOS session service framing
//!
//! Direct TCP transport (port 445) wraps every SMB2 message in a 4-byte
//! session-service header: a `0x00` message type followed by a 24-bit
//! big-endian payload length.

use crate::error::{Error, Result};
use bytes::{Buf, BytesMut};

/// Session message type - the only type accepted on port 445
pub const SESSION_MESSAGE: u8 = 0x00;

/// Header size in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum payload length (24 bits)
pub const MAX_PAYLOAD: usize = 0x00FF_FFFF;

/// Transform protocol ID (0xFD 'S' 'M' 'B')
pub const TRANSFORM_MAGIC: [u8; 4] = [0xFD, b'S', b'M', b'B'];

/// Prepend the session-service header to a payload
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::Framing(format!(
            "payload length {} exceeds NetBIOS maximum",
            payload.len()
        )));
    }
    let mut framed = Vec::with_capacity(HEADER_SIZE + payload.len());
    framed.push(SESSION_MESSAGE);
    framed.push((payload.len() >> 16) as u8);
    framed.push((payload.len() >> 8) as u8);
    framed.push(payload.len() as u8);
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Split complete frames off the front of `buffer`.
///
/// Consumed bytes are removed from the buffer; an incomplete trailing frame
/// (header plus partial body) stays as the residual for the next read.
pub fn unframe(buffer: &mut BytesMut) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    loop {
        if buffer.len() < HEADER_SIZE {
            return Ok(frames);
        }
        if buffer[0] != SESSION_MESSAGE {
            return Err(Error::Framing(format!(
                "invalid NetBIOS type 0x{:02x}",
                buffer[0]
            )));
        }
        let length =
            ((buffer[1] as usize) << 16) | ((buffer[2] as usize) << 8) | buffer[3] as usize;
        if buffer.len() < HEADER_SIZE + length {
            return Ok(frames);
        }
        buffer.advance(HEADER_SIZE);
        frames.push(buffer.split_to(length).to_vec());
    }
}

/// True iff the unwrapped payload begins with the Transform protocol ID
pub fn is_transform_header(payload: &[u8]) -> bool {
    payload.len() >= 4 && payload[..4] == TRANSFORM_MAGIC
}
