//! MAPI block header encoding/decoding
//!
//! Every block starts with a 2-byte little-endian header:
//!
//! ```text
//! +--------+--------+
//! |  (length << 1) | last  |
//! +--------+--------+
//! ```
//!
//! The low bit flags the final block of a message; the remaining 15 bits hold
//! the payload length. Outgoing blocks carry at most [`MAX_BLOCK_PAYLOAD`]
//! bytes; incoming blocks may use the full 15 bits.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::{BLOCK_HEADER_SIZE, MAX_BLOCK_PAYLOAD};
use crate::error::{Error, Result};

/// MAPI block header (2 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Payload length in bytes
    pub length: usize,
    /// Whether this block ends the message
    pub last: bool,
}

impl BlockHeader {
    /// Create a header for an outgoing block
    pub fn new(length: usize, last: bool) -> Result<Self> {
        if length > MAX_BLOCK_PAYLOAD {
            return Err(Error::protocol(format!(
                "block payload of {} bytes exceeds maximum of {}",
                length, MAX_BLOCK_PAYLOAD
            )));
        }
        Ok(Self { length, last })
    }

    /// Parse the header of an incoming block from its two raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "block header too short: {} bytes",
                data.len()
            )));
        }
        let mut buf = ReadBuffer::from_slice(&data[..BLOCK_HEADER_SIZE]);
        let raw = buf.read_u16_le()?;
        Ok(Self {
            length: (raw >> 1) as usize,
            last: raw & 1 == 1,
        })
    }

    /// The raw 16-bit header value
    pub fn raw(&self) -> u16 {
        ((self.length as u16) << 1) | self.last as u16
    }

    /// Write the header to a buffer
    pub fn write(&self, buf: &mut WriteBuffer) {
        buf.write_u16_le(self.raw());
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        self.raw().to_le_bytes()
    }
}
