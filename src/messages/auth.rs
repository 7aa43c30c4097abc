//! Login response
//!
//! The client answers the challenge with one colon-separated line:
//!
//! ```text
//! BIG:username:{ALGO}digest:language:database:FILETRANS:opt=1,opt=2:
//! ```
//!
//! The byte order token is always `BIG`; the server sends binary result sets
//! in its own byte order regardless. The `FILETRANS` token and the options
//! field are only sent to servers whose challenge has an options field.

use tracing::debug;

use crate::capabilities::{Capabilities, Challenge};
use crate::constants::handshake_option;
use crate::constants::FILE_TRANSFER_TOKEN;
use crate::crypto::{credential_digest, prehash_password};
use crate::error::Result;

/// Session option that can be set during login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOption {
    /// Option name as sent in the login response
    pub name: &'static str,
    /// Options level that introduced this option
    pub level: u32,
    /// Value to set
    pub value: i64,
    /// Whether the option went out with the login response
    pub sent: bool,
}

impl HandshakeOption {
    /// Create an option that has not been sent yet
    pub fn new(name: &'static str, level: u32, value: i64) -> Self {
        Self {
            name,
            level,
            value,
            sent: false,
        }
    }

    /// `auto_commit`
    pub fn auto_commit(enabled: bool) -> Self {
        Self::new("auto_commit", handshake_option::AUTO_COMMIT, enabled as i64)
    }

    /// `reply_size`
    pub fn reply_size(size: i64) -> Self {
        Self::new("reply_size", handshake_option::REPLY_SIZE, size)
    }

    /// `size_header`
    pub fn size_header(enabled: bool) -> Self {
        Self::new("size_header", handshake_option::SIZE_HEADER, enabled as i64)
    }

    /// `time_zone`, in seconds east of UTC
    pub fn time_zone(seconds_east: i32) -> Self {
        Self::new("time_zone", handshake_option::TIME_ZONE, seconds_east as i64)
    }
}

/// Credentials and target of a login attempt
pub struct AuthMessage {
    username: String,
    password: String,
    language: String,
    database: String,
}

impl AuthMessage {
    /// Create a login message
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        language: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            language: language.into(),
            database: database.into(),
        }
    }

    /// Build the response to `challenge`.
    ///
    /// Options whose level is below the server's options level are included
    /// and marked as sent; the rest are left for the caller to apply with
    /// commands after login. File transfer support is announced only when
    /// `capabilities` has it; otherwise its slot stays empty.
    pub fn build_response(
        &self,
        challenge: &Challenge,
        capabilities: &Capabilities,
        options: &mut [HandshakeOption],
    ) -> Result<String> {
        let algorithm = challenge.select_algorithm()?;
        let prehashed = prehash_password(challenge.password_algorithm()?, &self.password);
        let digest = credential_digest(algorithm, &prehashed, &challenge.salt);
        debug!(algorithm = %algorithm, "selected login hash algorithm");

        let mut response = format!(
            "BIG:{}:{}:{}:{}:",
            self.username, digest, self.language, self.database
        );

        if challenge.has_options {
            if capabilities.file_transfer {
                response.push_str(FILE_TRANSFER_TOKEN);
            }
            response.push(':');
            let mut sent = Vec::new();
            for option in options.iter_mut() {
                if option.level < challenge.options_level {
                    sent.push(format!("{}={}", option.name, option.value));
                    option.sent = true;
                }
            }
            debug!(options = ?sent, "login options");
            response.push_str(&sent.join(","));
            response.push(':');
        }

        Ok(response)
    }

    /// Overwrite the stored password
    pub fn clear_password(&mut self) {
        self.password.clear();
    }
}

impl std::fmt::Debug for AuthMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMessage")
            .field("username", &self.username)
            .field("language", &self.language)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Drop for AuthMessage {
    fn drop(&mut self) {
        self.clear_password();
    }
}
