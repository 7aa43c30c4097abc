//! Login result and redirects
//!
//! After the login response the server answers with one of:
//!
//! - an empty message or `=OK`: logged in,
//! - `#message`: logged in, with an informational message,
//! - `!message`: credentials rejected,
//! - `^mapi:...`: a redirect. A database proxy (`merovingian`) asks the
//!   client to log in again on the same connection; `monetdb://host:port/db`
//!   sends the client to another server.

use crate::constants::marker;
use crate::error::{Error, Result};

/// Where a redirect sends the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Restart authentication on the same connection
    Proxy,
    /// Reconnect to another server
    Server {
        /// New host
        host: String,
        /// New port
        port: u16,
        /// New database
        database: String,
    },
}

/// Outcome of one login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Logged in; carries the server's informational message, if any
    Ok(Option<String>),
    /// The server redirected the login
    Redirect(Redirect),
}

impl AuthResult {
    /// Classify the server's reply to a login response
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() || text == marker::OK {
            return Ok(AuthResult::Ok(None));
        }
        if let Some(info) = text.strip_prefix(marker::INFO) {
            return Ok(AuthResult::Ok(Some(info.trim().to_string())));
        }
        if let Some(message) = text.strip_prefix(marker::ERROR) {
            return Err(Error::AuthenticationFailed(message.trim().to_string()));
        }
        if let Some(rest) = text.strip_prefix(marker::REDIRECT) {
            // a redirect message may list several targets; only the first is used
            let first = rest.split_whitespace().next().unwrap_or_default();
            return Redirect::parse(first).map(AuthResult::Redirect);
        }
        Err(Error::UnknownResponse(text.to_string()))
    }
}

impl Redirect {
    /// Parse a redirect target such as `mapi:monetdb://host:50000/demo`
    pub fn parse(target: &str) -> Result<Self> {
        let rest = target
            .strip_prefix("mapi:")
            .ok_or_else(|| Error::protocol(format!("unknown redirect: {}", target)))?;

        if rest.starts_with("merovingian:") {
            return Ok(Redirect::Proxy);
        }

        let location = rest
            .strip_prefix("monetdb://")
            .ok_or_else(|| Error::protocol(format!("unknown redirect: {}", target)))?;
        let location = location.split('?').next().unwrap_or_default();
        let (authority, database) = location
            .split_once('/')
            .ok_or_else(|| Error::protocol(format!("redirect without database: {}", target)))?;
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| Error::protocol(format!("redirect without port: {}", target)))?;
        let port = port
            .parse()
            .map_err(|_| Error::protocol(format!("invalid port in redirect: {}", target)))?;

        Ok(Redirect::Server {
            host: host.to_string(),
            port,
            database: database.to_string(),
        })
    }
}
