//! Error types for the MonetDB client
//!
//! Errors are grouped by where they originate: the byte transport, the MAPI
//! framing and response grammar, the login exchange, the server's own error
//! lines, file transfers, and misuse of the API by the caller. [`ErrorKind`]
//! exposes that grouping so callers can decide whether a session is still
//! usable after an error.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the MonetDB client
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection between messages
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Connecting did not finish in time
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(Duration),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Malformed framing or response text
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response line started with a marker we do not understand
    #[error("unrecognized response line: {0:?}")]
    UnknownResponse(String),

    /// Not enough data left while decoding a binary buffer
    #[error("buffer underflow: need {needed} bytes but only {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    /// The server speaks a protocol version we do not implement
    #[error("server protocol version {0} not supported")]
    UnsupportedProtocol(String),

    // =========================================================================
    // Authentication Errors
    // =========================================================================
    /// The server rejected the credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// None of the offered hash algorithms is available locally
    #[error("unsupported hash algorithms required for login: {0}")]
    UnsupportedHashAlgorithms(String),

    /// Too many redirects during login
    #[error("maximal number of redirects reached ({0})")]
    TooManyRedirects(usize),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Error line reported by the server
    #[error("{}", format_server_error(code.as_deref(), message))]
    Server {
        code: Option<String>,
        message: String,
    },

    // =========================================================================
    // File Transfer Errors
    // =========================================================================
    /// An upload or download could not be completed
    #[error("file transfer failed: {0}")]
    Transfer(String),

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// Operation attempted on a closed connection
    #[error("connection is closed")]
    ConnectionNotReady,

    /// The result set was closed or never existed on this connection
    #[error("result set {0} is closed")]
    ResultSetClosed(u64),

    /// The prepared statement was released or never existed on this connection
    #[error("prepared statement {0} is not open")]
    StatementNotOpen(u64),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Value could not be converted
    #[error("data conversion error: {0}")]
    DataConversion(String),

    /// API used in the wrong state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

fn format_server_error(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) => format!("server error {}: {}", code, message),
        None => format!("server error: {}", message),
    }
}

/// Coarse classification of [`Error`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket or TLS failure
    Transport,
    /// Malformed framing or unrecognized response
    Protocol,
    /// Login rejected or no common hash algorithm
    Authentication,
    /// Error line reported by the server
    Server,
    /// File transfer handler failure
    Transfer,
    /// Caller misuse
    Usage,
}

impl Error {
    /// Create a server error from the text following the `!` marker.
    ///
    /// Lines of the form `!42000!message` carry a five character
    /// SQLSTATE code which is split off.
    pub fn server(line: &str) -> Self {
        let text = line.strip_prefix('!').unwrap_or(line);
        let bytes = text.as_bytes();
        if bytes.len() > 6 && bytes[5] == b'!' && bytes[..5].iter().all(|b| b.is_ascii_alphanumeric()) {
            Error::Server {
                code: Some(text[..5].to_string()),
                message: text[6..].to_string(),
            }
        } else {
            Error::Server {
                code: None,
                message: text.to_string(),
            }
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    /// Which family this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::ConnectionTimeout(_) | Error::Tls(_) => {
                ErrorKind::Transport
            }
            Error::Protocol(_)
            | Error::UnknownResponse(_)
            | Error::BufferUnderflow { .. }
            | Error::UnsupportedProtocol(_) => ErrorKind::Protocol,
            Error::AuthenticationFailed(_)
            | Error::UnsupportedHashAlgorithms(_)
            | Error::TooManyRedirects(_) => ErrorKind::Authentication,
            Error::Server { .. } => ErrorKind::Server,
            Error::Transfer(_) => ErrorKind::Transfer,
            Error::ConnectionNotReady
            | Error::ResultSetClosed(_)
            | Error::StatementNotOpen(_)
            | Error::InvalidConfig(_)
            | Error::DataConversion(_)
            | Error::InvalidState(_) => ErrorKind::Usage,
        }
    }

    /// Whether the session must be closed after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// SQLSTATE code of a server error, if the server sent one
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
