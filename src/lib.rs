#![warn(missing_docs)]

//! # monetdb-rs
//!
//! A pure Rust async client for MonetDB. No libmapi or other C client
//! libraries required.
//!
//! This crate implements the MAPI wire protocol entirely in Rust: the block
//! framing, the challenge/response login with redirects, result set
//! retrieval in text and binary form, and client-side file transfers for
//! `COPY ... ON CLIENT`.
//!
//! ## Features
//!
//! - **Pure Rust** - No MonetDB client libraries required
//! - **Async/await** - Built on Tokio for modern async applications
//! - **TLS** - Encrypted connections through rustls
//! - **Adaptive fetching** - Result batches grow with the consumer and can use binary export
//! - **File transfers** - Serve `ON CLIENT` uploads and downloads from a handler
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use monetdb_rs::{Config, Connection};
//!
//! #[tokio::main]
//! async fn main() -> monetdb_rs::Result<()> {
//!     let config = Config::new("localhost", 50000, "demo", "monetdb", "monetdb");
//!     let conn = Connection::connect_with_config(config).await?;
//!
//!     let result = conn.query("SELECT id, name FROM users").await?;
//!     for row in &result.rows {
//!         let id = row.get_i64(0).unwrap_or(0);
//!         let name = row.get_string(1).unwrap_or("");
//!         println!("User {}: {}", id, name);
//!     }
//!
//!     conn.close().await
//! }
//! ```
//!
//! ## Connection Options
//!
//! ### Unix-domain socket
//!
//! ```rust,no_run
//! use monetdb_rs::{Config, Connection};
//!
//! # async fn example() -> monetdb_rs::Result<()> {
//! let config = Config::unix("/tmp/.s.monetdb.50000", "demo", "monetdb", "monetdb");
//! let conn = Connection::connect_with_config(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### TLS
//!
//! ```rust,no_run
//! use monetdb_rs::{Config, Connection, TlsConfig};
//!
//! # async fn example() -> monetdb_rs::Result<()> {
//! let config = Config::new("db.example.com", 50000, "demo", "monetdb", "monetdb")
//!     .tls(TlsConfig::new().with_ca_cert("/etc/ssl/monetdb-ca.pem"));
//! let conn = Connection::connect_with_config(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Fetching
//!
//! [`Connection::execute`] returns a handle to a result set that stays on
//! the server; rows are pulled in batches whose sizes follow the consumer.
//!
//! ```rust,no_run
//! use monetdb_rs::{BinaryMode, Connection, ExecuteResult, FetchPolicy};
//!
//! # async fn example(conn: Connection) -> monetdb_rs::Result<()> {
//! let policy = FetchPolicy::default().replysize(-1).binary(BinaryMode::Auto);
//! if let ExecuteResult::ResultSet(rs) = conn.execute_with("SELECT * FROM big", &policy).await? {
//!     loop {
//!         let rows = conn.fetch_next_batch(rs.id).await?;
//!         if rows.is_empty() {
//!             break;
//!         }
//!         println!("{} rows", rows.len());
//!     }
//!     conn.close_result(rs.id).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! use monetdb_rs::Connection;
//!
//! # async fn example(conn: Connection) -> monetdb_rs::Result<()> {
//! // Auto-commit is off by default
//! conn.execute("INSERT INTO accounts VALUES (1, 100.0)").await?;
//! conn.execute("UPDATE accounts SET balance = balance - 50 WHERE id = 1").await?;
//! conn.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Data Types
//!
//! | MonetDB Type | Rust Type |
//! |--------------|-----------|
//! | TINYINT .. HUGEINT | `i64`, `i128` |
//! | DECIMAL | [`Decimal`] |
//! | REAL, DOUBLE | `f64` |
//! | VARCHAR, CLOB | `String` |
//! | BLOB | `Vec<u8>` |
//! | BOOLEAN | `bool` |
//! | DATE, TIME, TIMESTAMP | `chrono` types |
//! | TIMESTAMPTZ, TIMETZ | `chrono` types with the session offset |
//! | INTERVAL | `chrono::TimeDelta` or months |
//! | UUID | `uuid::Uuid` |
//! | JSON | `serde_json::Value` |

pub mod block;
pub mod buffer;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod filetransfer;
pub mod messages;
pub mod policy;
pub mod resultset;
pub mod row;
pub mod statement;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use capabilities::Capabilities;
pub use config::Config;
pub use connection::{Connection, ConnectionState, ExecuteResult, ServerInfo};
pub use error::{Error, ErrorKind, Result};
pub use filetransfer::{
    Download, DownloadReader, RefuseTransfers, SafeDirectoryHandler, TransferDirection,
    TransferHandler, TransferRequest, Upload, UploadWriter,
};
pub use policy::{BinaryMode, FetchPolicy};
pub use resultset::{QueryResult, ResultSetInfo};
pub use row::{Row, Value};
pub use statement::{ColumnInfo, ParameterInfo, PreparedStatement};
pub use transport::{StreamTransport, TlsConfig, Transport};
pub use types::{Decimal, SqlType};

// Re-export serde_json for users working with JSON columns
pub use serde_json;
