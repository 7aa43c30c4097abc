//! Outgoing commands
//!
//! A command is one text message. SQL goes out as `s<query>\n;`; session
//! and result set management uses `X` commands.

use std::fmt;

/// A command sent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// SQL text
    Sql(String),
    /// Empty message, the answer to a "more input" prompt
    Continue,
    /// `Xreply_size N`
    ReplySize(i64),
    /// `Xexport id offset count`
    Export {
        /// Result set id
        id: u64,
        /// First row
        offset: u64,
        /// Number of rows
        count: u64,
    },
    /// `Xexportbin id offset count`
    ExportBinary {
        /// Result set id
        id: u64,
        /// First row
        offset: u64,
        /// Number of rows
        count: u64,
    },
    /// `Xclose id`
    Close(u64),
    /// `Xrelease id`
    Release(u64),
    /// `Xauto_commit 0|1`
    AutoCommit(bool),
    /// `Xsizeheader 0|1`
    SizeHeader(bool),
    /// `Xclientinfo` with `key=value` lines
    ClientInfo(ClientInfo),
}

impl Command {
    /// Wire text of the command
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Whether the reply to this command is a binary batch
    pub fn expects_binary(&self) -> bool {
        matches!(self, Command::ExportBinary { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Sql(sql) => write!(f, "s{}\n;", sql),
            Command::Continue => Ok(()),
            Command::ReplySize(n) => write!(f, "Xreply_size {}", n),
            Command::Export { id, offset, count } => {
                write!(f, "Xexport {} {} {}", id, offset, count)
            }
            Command::ExportBinary { id, offset, count } => {
                write!(f, "Xexportbin {} {} {}", id, offset, count)
            }
            Command::Close(id) => write!(f, "Xclose {}", id),
            Command::Release(id) => write!(f, "Xrelease {}", id),
            Command::AutoCommit(on) => write!(f, "Xauto_commit {}", *on as u8),
            Command::SizeHeader(on) => write!(f, "Xsizeheader {}", *on as u8),
            Command::ClientInfo(info) => write!(f, "Xclientinfo {}", info),
        }
    }
}

/// Client identification reported to servers that accept `Xclientinfo`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    /// Host the client runs on
    pub hostname: Option<String>,
    /// Application name
    pub application: Option<String>,
    /// Library name and version
    pub library: Option<String>,
    /// Process id
    pub pid: Option<u32>,
    /// Free-text remark
    pub remark: Option<String>,
}

impl ClientInfo {
    /// Info for the current process
    pub fn current(application: Option<String>, remark: Option<String>) -> Self {
        Self {
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok()),
            application: application.or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            }),
            library: Some(crate::constants::CLIENT_LIBRARY.to_string()),
            pid: Some(std::process::id()),
            remark,
        }
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pid = self.pid.map(|p| p.to_string());
        let fields = [
            ("ClientHostname", self.hostname.as_deref()),
            ("ApplicationName", self.application.as_deref()),
            ("ClientLibrary", self.library.as_deref()),
            ("ClientPid", pid.as_deref()),
            ("ClientRemark", self.remark.as_deref()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                writeln!(f, "{}={}", key, value.replace('\n', " "))?;
            }
        }
        Ok(())
    }
}
