//! Read buffer for decoding binary MAPI data
//!
//! Used for block headers and for the columnar binary result format. Every
//! read is bounds checked and fails with [`Error::BufferUnderflow`] instead of
//! running past the end of the message.

use bytes::Bytes;

use super::Endian;
use crate::error::{Error, Result};

macro_rules! read_fixed {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $n:expr) => {
        $(#[$doc])*
        pub fn $name(&mut self) -> Result<$ty> {
            let mut raw = [0u8; $n];
            self.read_bytes(&mut raw)?;
            Ok(match self.endian {
                Endian::Little => <$ty>::from_le_bytes(raw),
                Endian::Big => <$ty>::from_be_bytes(raw),
            })
        }
    };
}

/// A buffer for reading binary protocol data
#[derive(Debug)]
pub struct ReadBuffer {
    /// The underlying byte data
    data: Bytes,
    /// Current read position
    pos: usize,
    /// Byte order for multi-byte reads
    endian: Endian,
}

impl ReadBuffer {
    /// Create a new little-endian ReadBuffer from bytes
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            endian: Endian::Little,
        }
    }

    /// Create a new ReadBuffer with the given byte order
    pub fn with_endian(data: Bytes, endian: Endian) -> Self {
        Self { data, pos: 0, endian }
    }

    /// Create a new ReadBuffer from a byte slice
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Byte order used for multi-byte reads
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Get the current position in the buffer
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to be read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if there are at least `n` bytes remaining
    #[inline]
    pub fn has_remaining(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    /// Skip `n` bytes in the buffer
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.pos += n;
        Ok(())
    }

    /// Set the buffer position
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::BufferUnderflow {
                needed: pos,
                available: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// A new buffer over `len` bytes starting at absolute offset `start`,
    /// sharing storage and byte order with this one
    pub fn sub_buffer(&self, start: usize, len: usize) -> Result<ReadBuffer> {
        let end = start.checked_add(len).ok_or(Error::BufferUnderflow {
            needed: usize::MAX,
            available: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(Error::BufferUnderflow {
                needed: end,
                available: self.data.len(),
            });
        }
        Ok(ReadBuffer::with_endian(self.data.slice(start..end), self.endian))
    }

    /// Get a slice of the remaining data
    pub fn remaining_slice(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::BufferUnderflow {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Raw byte reads
    // =========================================================================

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read a single signed byte
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read raw bytes into a slice
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = buf.len();
        self.ensure_remaining(n)?;
        buf.copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(())
    }

    /// Read raw bytes and return as a new Bytes
    pub fn read_bytes_owned(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_remaining(n)?;
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    /// Read up to the next `terminator` byte, consuming the terminator.
    ///
    /// Fails if the terminator does not occur before the end of the buffer.
    pub fn read_until(&mut self, terminator: u8) -> Result<Bytes> {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == terminator) {
            Some(idx) => {
                let bytes = self.data.slice(self.pos..self.pos + idx);
                self.pos += idx + 1;
                Ok(bytes)
            }
            None => Err(Error::BufferUnderflow {
                needed: rest.len() + 1,
                available: rest.len(),
            }),
        }
    }

    // =========================================================================
    // Multi-byte reads in the buffer's byte order
    // =========================================================================

    read_fixed!(
        /// Read a 16-bit unsigned integer
        read_u16, u16, 2
    );
    read_fixed!(
        /// Read a 16-bit signed integer
        read_i16, i16, 2
    );
    read_fixed!(
        /// Read a 32-bit unsigned integer
        read_u32, u32, 4
    );
    read_fixed!(
        /// Read a 32-bit signed integer
        read_i32, i32, 4
    );
    read_fixed!(
        /// Read a 64-bit signed integer
        read_i64, i64, 8
    );
    read_fixed!(
        /// Read a 128-bit signed integer
        read_i128, i128, 16
    );
    read_fixed!(
        /// Read a 32-bit IEEE float
        read_f32, f32, 4
    );
    read_fixed!(
        /// Read a 64-bit IEEE float
        read_f64, f64, 8
    );

    /// Read a little-endian u16 regardless of the buffer's byte order
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let mut raw = [0u8; 2];
        self.read_bytes(&mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }
}
