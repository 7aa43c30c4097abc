//! Buffer abstractions for MAPI encoding/decoding
//!
//! Block headers are always little-endian; binary result sets use the byte
//! order the server announced in its login challenge.

mod read;
mod write;

pub use read::ReadBuffer;
pub use write::WriteBuffer;

/// Byte order of multi-byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Least significant byte first (`LIT` in the challenge)
    #[default]
    Little,
    /// Most significant byte first (`BIG` in the challenge)
    Big,
}

impl Endian {
    /// Parse the endianness token of a login challenge
    pub fn from_challenge(token: &str) -> Option<Self> {
        match token {
            "LIT" => Some(Endian::Little),
            "BIG" => Some(Endian::Big),
            _ => None,
        }
    }

    /// The token the server uses for this byte order
    pub fn as_challenge_token(&self) -> &'static str {
        match self {
            Endian::Little => "LIT",
            Endian::Big => "BIG",
        }
    }
}
