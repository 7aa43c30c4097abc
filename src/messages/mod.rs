//! MAPI protocol messages
//!
//! Login handshake texts, outgoing commands and response parsing.

mod auth;
mod command;
mod redirect;
mod response;

pub use auth::{AuthMessage, HandshakeOption};
pub use command::{ClientInfo, Command};
pub use redirect::{AuthResult, Redirect};
pub use response::{BlockReply, RawRow, Reply, Response, ResponseLine, TableReply};
