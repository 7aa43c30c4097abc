//! MAPI protocol constants
//!
//! Values fixed by the MonetDB wire protocol (version 9) together with the
//! client defaults used by the fetch policy and file transfers.

// =============================================================================
// Framing
// =============================================================================

/// Default MonetDB port
pub const DEFAULT_PORT: u16 = 50000;

/// Size of the little-endian block header
pub const BLOCK_HEADER_SIZE: usize = 2;

/// Largest payload a single block may carry: `(8 * 1024) - 2`
pub const MAX_BLOCK_PAYLOAD: usize = 8190;

/// The only protocol version this client speaks
pub const PROTOCOL_VERSION: &str = "9";

/// Byte sent on a Unix-domain socket before the challenge is read
pub const UNIX_SOCKET_PRIME: &[u8] = b"0";

/// Bytes sent on TCP before the challenge is read: an empty, non-final block
pub const TCP_PRIME: &[u8] = &[0, 0];

/// Header announcing an oversized non-final block, used to abort a session
pub const SABOTAGE_HEADER: u16 = 2 * 8193;

/// Invalid UTF-8 body sent after [`SABOTAGE_HEADER`]
pub const SABOTAGE_BODY: &[u8] = b"ERROR\x80ERROR";

// =============================================================================
// Prompts and line markers
// =============================================================================

/// Server prompts that end a message
pub mod prompt {
    /// The server expects more input
    pub const MORE: &str = "\x01\x02\n";
    /// The server requests a file transfer; the command follows on the next line
    pub const FILE_TRANSFER: &str = "\x01\x03\n";
}

/// First characters of response lines
pub mod marker {
    /// Informational message
    pub const INFO: char = '#';
    /// Error message
    pub const ERROR: char = '!';
    /// Query result header (`&1` .. `&6`)
    pub const RESULT: char = '&';
    /// Column metadata
    pub const HEADER: char = '%';
    /// Bracketed tuple
    pub const TUPLE: char = '[';
    /// Single value tuple without brackets
    pub const SLICELESS: char = '=';
    /// Login redirect
    pub const REDIRECT: char = '^';
    /// Positive acknowledgement
    pub const OK: &str = "=OK";
}

/// Numeric code following `&` in a result header
pub mod query_type {
    /// Result set with rows
    pub const TABLE: u8 = 1;
    /// Row count of an INSERT/UPDATE/DELETE
    pub const UPDATE: u8 = 2;
    /// Schema change
    pub const SCHEMA: u8 = 3;
    /// Transaction state change
    pub const TRANSACTION: u8 = 4;
    /// Prepared statement description
    pub const PREPARE: u8 = 5;
    /// Continuation of a result set after an export command
    pub const BLOCK: u8 = 6;
}

/// Levels of the options carried in the login response
pub mod handshake_option {
    /// `auto_commit=0|1`
    pub const AUTO_COMMIT: u32 = 1;
    /// `reply_size=N`
    pub const REPLY_SIZE: u32 = 2;
    /// `size_header=0|1`
    pub const SIZE_HEADER: u32 = 3;
    /// `time_zone=seconds east of UTC`
    pub const TIME_ZONE: u32 = 5;
}

// =============================================================================
// Fetch policy
// =============================================================================

/// Numbers used by the adaptive batching policy
pub mod policy {
    /// Initial reply size when binary export will deliver the rest
    pub const SMALL_REPLY_SIZE: i64 = 10;
    /// Default reply size and array size
    pub const DEFAULT_REPLY_SIZE: i64 = 100;
    /// Default bound on prefetched, unconsumed rows
    pub const DEFAULT_MAX_PREFETCH: i64 = 2500;
    /// Highest binary export level this client understands
    pub const MAX_BINARY_LEVEL: u32 = 1;
}

// =============================================================================
// Login
// =============================================================================

/// Maximum number of login redirects followed before giving up
pub const MAX_REDIRECTS: usize = 10;

/// Library identification sent with client info
pub const CLIENT_LIBRARY: &str = concat!("monetdb-rs ", env!("CARGO_PKG_VERSION"));

/// Capability tokens that may appear in the challenge
pub mod challenge_token {
    /// Binary result set export, followed by `=level`
    pub const BINARY: &str = "BINARY";
    /// The server accepts `Xclientinfo`
    pub const CLIENT_INFO: &str = "CLIENTINFO";
    /// Options level prefix, followed by the level
    pub const OPTIONS_LEVEL: &str = "sql=";
    /// The server reports query ids in result headers
    pub const QUERY_ID: &str = "QUERYID";
}

/// Token announcing file transfer support in the login response
pub const FILE_TRANSFER_TOKEN: &str = "FILETRANS";

// =============================================================================
// File transfer
// =============================================================================

/// Bytes after which an upload asks the server whether to continue
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Refusal texts sent to the server
pub mod transfer_message {
    /// No handler registered for uploads
    pub const NO_UPLOAD_HANDLER: &str = "No upload handler has been registered with monetdb-rs";
    /// No handler registered for downloads
    pub const NO_DOWNLOAD_HANDLER: &str = "No download handler has been registered with monetdb-rs";
    /// Handler returned without accepting or refusing
    pub const NO_RESPONSE: &str = "Transfer handler did not respond to the request";
    /// The transfer command could not be parsed
    pub const INVALID_COMMAND: &str = "Invalid file transfer command";
}
