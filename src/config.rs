//! Connection configuration
//!
//! [`Config`] holds an already validated parameter set: where to connect,
//! who to log in as, and the session defaults applied during login. Parsing
//! `monetdb://` URLs is left to the caller.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_PORT, MAX_REDIRECTS};
use crate::error::{Error, Result};
use crate::policy::{BinaryMode, FetchPolicy};
use crate::transport::TlsConfig;

/// Connection configuration for MonetDB databases.
///
/// # Examples
///
/// ## Basic connection
///
/// ```rust
/// use monetdb_rs::Config;
///
/// let config = Config::new("localhost", 50000, "demo", "monetdb", "monetdb");
/// ```
///
/// ## With session options
///
/// ```rust
/// use monetdb_rs::{BinaryMode, Config};
/// use std::time::Duration;
///
/// let config = Config::new("localhost", 50000, "demo", "monetdb", "monetdb")
///     .connect_timeout(Duration::from_secs(30))
///     .autocommit(true)
///     .replysize(500)
///     .binary(BinaryMode::Off);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Unix-domain socket path; used instead of TCP when set
    pub unix_socket: Option<PathBuf>,
    /// Database name
    pub database: String,
    /// Username for authentication
    pub username: String,
    /// Password for authentication
    password: String,
    /// Query language, normally `sql`
    pub language: String,
    /// TLS configuration; plain TCP when `None`
    pub tls: Option<TlsConfig>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Autocommit state requested at login
    pub autocommit: bool,
    /// Session time zone in minutes east of UTC; the local offset when `None`
    pub timezone_minutes: Option<i32>,
    /// Schema selected after login
    pub schema: Option<String>,
    /// Send client info when the server supports it
    pub client_info: bool,
    /// Application name reported with client info
    pub client_application: Option<String>,
    /// Free-text remark reported with client info
    pub client_remark: Option<String>,
    /// Advertise file transfer support
    pub file_transfer: bool,
    /// Maximum number of login redirects to follow
    pub max_redirects: usize,
    /// Session fetch policy
    pub fetch: FetchPolicy,
}

impl Config {
    /// Create a new configuration for a TCP connection
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            unix_socket: None,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            language: "sql".to_string(),
            tls: None,
            connect_timeout: Duration::from_secs(10),
            autocommit: false,
            timezone_minutes: None,
            schema: None,
            client_info: true,
            client_application: None,
            client_remark: None,
            file_transfer: true,
            max_redirects: MAX_REDIRECTS,
            fetch: FetchPolicy::default(),
        }
    }

    /// Create a configuration that connects through a Unix-domain socket
    pub fn unix(
        path: impl Into<PathBuf>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::new("localhost", DEFAULT_PORT, database, username, password);
        config.unix_socket = Some(path.into());
        config
    }

    /// Get the password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Set the password
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Use TLS with the given configuration
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the query language
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the autocommit state requested at login
    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// Set the session time zone, in minutes east of UTC
    pub fn timezone_minutes(mut self, minutes: i32) -> Self {
        self.timezone_minutes = Some(minutes);
        self
    }

    /// Select a schema after login
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Enable or disable sending client info
    pub fn client_info(mut self, enabled: bool) -> Self {
        self.client_info = enabled;
        self
    }

    /// Set the application name reported with client info
    pub fn client_application(mut self, name: impl Into<String>) -> Self {
        self.client_application = Some(name.into());
        self
    }

    /// Set the remark reported with client info
    pub fn client_remark(mut self, remark: impl Into<String>) -> Self {
        self.client_remark = Some(remark.into());
        self
    }

    /// Enable or disable advertising file transfer support
    pub fn file_transfer(mut self, enabled: bool) -> Self {
        self.file_transfer = enabled;
        self
    }

    /// Set the number of login redirects to follow
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Set the session reply size
    pub fn replysize(mut self, replysize: i64) -> Self {
        self.fetch.replysize = replysize;
        self
    }

    /// Set the session prefetch bound
    pub fn maxprefetch(mut self, maxprefetch: i64) -> Self {
        self.fetch.maxprefetch = maxprefetch;
        self
    }

    /// Set the session batch stride
    pub fn arraysize(mut self, arraysize: NonZeroUsize) -> Self {
        self.fetch.arraysize = Some(arraysize);
        self
    }

    /// Set the binary export preference
    pub fn binary(mut self, binary: BinaryMode) -> Self {
        self.fetch.binary = binary;
        self
    }

    /// Replace the whole fetch policy
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch = policy;
        self
    }

    /// Time zone offset in seconds east of UTC sent at login
    pub fn timezone_offset_seconds(&self) -> i32 {
        match self.timezone_minutes {
            Some(minutes) => minutes * 60,
            None => chrono::Local::now().offset().local_minus_utc(),
        }
    }

    /// Check the values the protocol cannot carry
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::InvalidConfig("username must not be empty".into()));
        }
        for (what, value) in [
            ("username", &self.username),
            ("database", &self.database),
            ("language", &self.language),
        ] {
            if value.contains(':') || value.contains('\n') {
                return Err(Error::InvalidConfig(format!(
                    "{} must not contain ':' or newlines",
                    what
                )));
            }
        }
        if let Some(minutes) = self.timezone_minutes {
            if minutes.abs() >= 24 * 60 {
                return Err(Error::InvalidConfig(format!(
                    "time zone offset out of range: {} minutes",
                    minutes
                )));
            }
        }
        Ok(())
    }

    /// Address string for logging
    pub fn target(&self) -> String {
        match &self.unix_socket {
            Some(path) => format!("{}/{}", path.display(), self.database),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}
