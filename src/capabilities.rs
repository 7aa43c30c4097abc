//! Login challenge parsing and capability negotiation
//!
//! The first message of every session is the server's challenge:
//!
//! ```text
//! salt:server:9:ALGO,ALGO,...:LIT|BIG:PWALGO:sql=6:BINARY=1:CLIENTINFO:
//! ```
//!
//! Everything after the password hash algorithm is optional. Older servers
//! stop after the sixth field; those servers cannot take login options and
//! do not know about file transfers.

use crate::buffer::Endian;
use crate::constants::challenge_token::{BINARY, CLIENT_INFO, OPTIONS_LEVEL, QUERY_ID};
use crate::constants::policy::MAX_BINARY_LEVEL;
use crate::constants::PROTOCOL_VERSION;
use crate::crypto::HashAlgorithm;
use crate::error::{Error, Result};

/// Parsed login challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Salt mixed into the credential digest
    pub salt: String,
    /// Server identity (`mserver`, `merovingian`)
    pub server_type: String,
    /// Protocol version, always `9` once parsed
    pub protocol: String,
    /// Hash algorithms in the order offered, including ones we cannot compute
    pub hashes: Vec<String>,
    /// Byte order of binary result sets
    pub endian: Endian,
    /// Algorithm the server stores password hashes with
    pub password_hash: String,
    /// Whether the challenge carries the options field
    pub has_options: bool,
    /// Options level from `sql=N`; 0 when absent
    pub options_level: u32,
    /// Binary export level from `BINARY=N`; 0 when absent
    pub binary_level: u32,
    /// Server accepts `Xclientinfo`
    pub client_info: bool,
    /// Server reports query ids
    pub query_id: bool,
}

impl Challenge {
    /// Parse the challenge message text
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim_end_matches('\n');
        let mut parts: Vec<&str> = text.split(':').collect();
        if parts.len() < 7 || parts.last() != Some(&"") {
            return Err(Error::protocol(format!(
                "server sent invalid challenge: {:?}",
                text
            )));
        }
        parts.pop();

        let protocol = parts[2];
        if protocol != PROTOCOL_VERSION {
            return Err(Error::UnsupportedProtocol(protocol.to_string()));
        }

        let endian = Endian::from_challenge(parts[4]).ok_or_else(|| {
            Error::protocol(format!("invalid byte order in challenge: {:?}", parts[4]))
        })?;

        let mut challenge = Challenge {
            salt: parts[0].to_string(),
            server_type: parts[1].to_string(),
            protocol: protocol.to_string(),
            hashes: parts[3]
                .split(',')
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect(),
            endian,
            password_hash: parts[5].to_string(),
            has_options: parts.len() >= 7,
            options_level: 0,
            binary_level: 0,
            client_info: false,
            query_id: false,
        };

        for token in parts[6..].iter().flat_map(|field| field.split(',')) {
            if let Some(level) = token.strip_prefix(OPTIONS_LEVEL) {
                challenge.options_level = level.parse().map_err(|_| {
                    Error::protocol(format!(
                        "invalid sql options level in server challenge: {}",
                        token
                    ))
                })?;
            } else if let Some(level) = token
                .strip_prefix(BINARY)
                .and_then(|rest| rest.strip_prefix('='))
            {
                challenge.binary_level = level.parse().unwrap_or(0);
            } else if token == CLIENT_INFO {
                challenge.client_info = true;
            } else if token == QUERY_ID {
                challenge.query_id = true;
            }
        }

        Ok(challenge)
    }

    /// First offered algorithm this client can compute
    pub fn select_algorithm(&self) -> Result<HashAlgorithm> {
        self.hashes
            .iter()
            .find_map(|name| HashAlgorithm::from_name(name))
            .ok_or_else(|| Error::UnsupportedHashAlgorithms(self.hashes.join(",")))
    }

    /// Algorithm used to pre-hash the password
    pub fn password_algorithm(&self) -> Result<HashAlgorithm> {
        HashAlgorithm::from_name(&self.password_hash)
            .ok_or_else(|| Error::UnsupportedHashAlgorithms(self.password_hash.clone()))
    }

    /// Whether the server sent a redirect-capable proxy challenge
    pub fn is_proxy(&self) -> bool {
        self.server_type == "merovingian"
    }
}

/// Capabilities in effect for a session: what the client asked for,
/// limited to what the server offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Binary export level usable for result batches; 0 when unavailable
    pub binary_level: u32,
    /// File transfers were advertised and the server can request them
    pub file_transfer: bool,
    /// `Xclientinfo` is sent and accepted
    pub client_info: bool,
    /// Options level of the server
    pub options_level: u32,
    /// Byte order of binary result sets
    pub endian: Endian,
}

/// What the client would like to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedCapabilities {
    /// Binary result batches
    pub binary: bool,
    /// File transfers
    pub file_transfer: bool,
    /// Client info
    pub client_info: bool,
}

impl Capabilities {
    /// Intersect the requested capabilities with the server's offer
    pub fn negotiate(requested: RequestedCapabilities, challenge: &Challenge) -> Self {
        Self {
            binary_level: if requested.binary {
                challenge.binary_level.min(MAX_BINARY_LEVEL)
            } else {
                0
            },
            file_transfer: requested.file_transfer && challenge.has_options,
            client_info: requested.client_info && challenge.client_info,
            options_level: challenge.options_level,
            endian: challenge.endian,
        }
    }

    /// Whether binary result batches are available
    pub fn supports_binary(&self) -> bool {
        self.binary_level > 0
    }
}
