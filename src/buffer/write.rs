//! Write buffer for encoding binary MAPI data
//!
//! Block framing writes little-endian headers through this type; the binary
//! result encoder used in tests writes in the server's byte order.

use bytes::{BufMut, Bytes, BytesMut};

use super::Endian;

macro_rules! write_fixed {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self, value: $ty) {
            match self.endian {
                Endian::Little => self.data.put_slice(&value.to_le_bytes()),
                Endian::Big => self.data.put_slice(&value.to_be_bytes()),
            }
        }
    };
}

/// A growable buffer for writing binary protocol data
#[derive(Debug)]
pub struct WriteBuffer {
    /// The underlying byte buffer
    data: BytesMut,
    /// Byte order for multi-byte writes
    endian: Endian,
}

impl WriteBuffer {
    /// Create a new little-endian WriteBuffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    /// Create a new little-endian WriteBuffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            endian: Endian::Little,
        }
    }

    /// Create a WriteBuffer using the given byte order
    pub fn with_endian(endian: Endian) -> Self {
        Self {
            data: BytesMut::with_capacity(8192),
            endian,
        }
    }

    /// Get the current length of data in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Get the buffer contents as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the buffer into immutable Bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write a single signed byte
    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Write a little-endian u16 regardless of the buffer's byte order
    pub fn write_u16_le(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    write_fixed!(
        /// Write a 16-bit signed integer
        write_i16, i16
    );
    write_fixed!(
        /// Write a 32-bit unsigned integer
        write_u32, u32
    );
    write_fixed!(
        /// Write a 32-bit signed integer
        write_i32, i32
    );
    write_fixed!(
        /// Write a 64-bit signed integer
        write_i64, i64
    );
    write_fixed!(
        /// Write a 128-bit signed integer
        write_i128, i128
    );
    write_fixed!(
        /// Write a 32-bit IEEE float
        write_f32, f32
    );
    write_fixed!(
        /// Write a 64-bit IEEE float
        write_f64, f64
    );
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_u16_le() {
        let mut buf = WriteBuffer::new();
        buf.write_u16_le(0x0102);
        assert_eq!(buf.as_slice(), &[0x02, 0x01]);
    }

    #[test]
    fn test_write_follows_endian() {
        let mut big = WriteBuffer::with_endian(Endian::Big);
        big.write_i32(1);
        assert_eq!(big.as_slice(), &[0, 0, 0, 1]);

        let mut little = WriteBuffer::with_endian(Endian::Little);
        little.write_i32(1);
        assert_eq!(little.as_slice(), &[1, 0, 0, 0]);
    }
}
