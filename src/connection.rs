//! MonetDB database connection
//!
//! This module provides the main `Connection` type for interacting with MonetDB.
//!
//! # Example
//!
//! ```rust,no_run
//! use monetdb_rs::{Config, Connection, ExecuteResult};
//!
//! # async fn example() -> monetdb_rs::Result<()> {
//! let conn = Connection::connect("localhost", 50000, "demo", "monetdb", "monetdb").await?;
//!
//! // Materialize a whole result
//! let result = conn.query("SELECT name FROM sys.tables").await?;
//! for row in &result.rows {
//!     println!("{:?}", row.get_string(0));
//! }
//!
//! // Or pull rows incrementally
//! if let ExecuteResult::ResultSet(rs) = conn.execute("SELECT * FROM sys.functions").await? {
//!     while let Some(row) = conn.fetch_one(rs.id).await? {
//!         println!("{:?}", row);
//!     }
//!     conn.close_result(rs.id).await?;
//! }
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::FixedOffset;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::block::BlockStream;
use crate::buffer::Endian;
use crate::capabilities::{Capabilities, Challenge, RequestedCapabilities};
use crate::config::Config;
use crate::constants::{prompt, TCP_PRIME, UNIX_SOCKET_PRIME};
use crate::error::{Error, Result};
use crate::filetransfer::{self, TransferHandler, TransferOutcome};
use crate::messages::{
    AuthMessage, AuthResult, ClientInfo, Command, HandshakeOption, Redirect, Reply, Response,
};
use crate::policy::{BatchPolicy, BinaryMode, FetchPolicy};
use crate::resultset::{QueryResult, ResultSet, ResultSetInfo};
use crate::row::Row;
use crate::statement::PreparedStatement;
use crate::transport::{self, Transport};
use crate::types::has_binary_trailer;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, login not finished
    Connected,
    /// Logged in and ready for commands
    Ready,
    /// Connection is closed
    Closed,
}

/// Server information obtained during login
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server identity from the challenge (`mserver`)
    pub server_type: String,
    /// Host actually connected to, after redirects
    pub host: String,
    /// Port actually connected to, after redirects
    pub port: u16,
    /// Database actually connected to, after redirects
    pub database: String,
    /// Protocol version
    pub protocol_version: String,
    /// Hash algorithm used for the credential digest
    pub hash_algorithm: String,
    /// Capabilities in effect
    pub capabilities: Capabilities,
    /// Number of redirects followed
    pub redirects: usize,
    /// Informational messages sent with the login result
    pub messages: Vec<String>,
}

/// Outcome of one statement
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    /// A result set; fetch rows with its id
    ResultSet(ResultSetInfo),
    /// Rows affected by INSERT, UPDATE or DELETE
    Update {
        /// Rows affected
        affected: i64,
        /// Last generated id, if any
        last_id: Option<i64>,
    },
    /// Schema change
    Schema,
    /// Transaction statement; carries the new autocommit state
    Transaction {
        /// Whether autocommit is now on
        autocommit: bool,
    },
    /// A prepared statement
    Prepared(PreparedStatement),
    /// The command produced no result
    Empty,
}

/// Internal connection state shared across async operations
struct ConnectionInner {
    stream: Option<BlockStream>,
    state: ConnectionState,
    server_info: ServerInfo,
    capabilities: Capabilities,
    /// Session fetch settings
    fetch: FetchPolicy,
    session_offset: FixedOffset,
    autocommit: bool,
    /// Reply size currently set on the server
    server_reply_size: Option<i64>,
    result_sets: HashMap<u64, ResultSet>,
    statements: HashMap<u64, PreparedStatement>,
    /// Results of the last command not yet handed out
    pending: VecDeque<Reply>,
    /// Batching state for results in `pending`
    pending_policy: Option<(BatchPolicy, usize)>,
    /// Result set most recently handed out by `execute`/`next_result`
    current: Option<u64>,
    /// Server result sets that were never handed out and still need `Xclose`
    abandoned: Vec<u64>,
    transfer_handler: Option<Arc<dyn TransferHandler>>,
}

impl ConnectionInner {
    fn stream_mut(&mut self) -> Result<&mut BlockStream> {
        self.stream.as_mut().ok_or(Error::ConnectionNotReady)
    }

    fn result_set_mut(&mut self, id: u64) -> Result<&mut ResultSet> {
        self.result_sets
            .get_mut(&id)
            .ok_or(Error::ResultSetClosed(id))
    }

    /// Send a command and return the raw response text
    async fn request(&mut self, command: &Command) -> Result<String> {
        let text = command.encode();
        trace!(command = %text.lines().next().unwrap_or_default(), "sending command");
        self.stream_mut()?.write_text(&text).await?;
        self.read_response().await
    }

    /// Send a command and parse the response
    async fn command(&mut self, command: &Command) -> Result<Response> {
        let text = self.request(command).await?;
        Response::parse(&text)
    }

    /// Read one response, answering prompts and serving file transfers on
    /// the way.
    async fn read_response(&mut self) -> Result<String> {
        let handler = self.transfer_handler.clone();
        let mut text = String::new();
        let mut transfer_error = None;
        let mut sabotaged = None;

        let stream = self.stream.as_mut().ok_or(Error::ConnectionNotReady)?;
        loop {
            let message = stream.read_text().await?;
            if let Some((before, command)) = split_transfer_request(&message) {
                text.push_str(before);
                match filetransfer::handle_transfer(stream, handler.as_deref(), command).await {
                    TransferOutcome::Completed => {}
                    TransferOutcome::Failed(e) if e.is_fatal() => return Err(e),
                    TransferOutcome::Failed(e) => {
                        transfer_error.get_or_insert(e);
                    }
                    TransferOutcome::Sabotaged(e) => {
                        sabotaged = Some(e);
                        break;
                    }
                }
                continue;
            }
            if let Some(before) = message.strip_suffix(prompt::MORE) {
                trace!("server asked for more input");
                text.push_str(before);
                stream.write_message(&[]).await?;
                continue;
            }
            text.push_str(&message);
            break;
        }

        if let Some(e) = sabotaged {
            self.stream = None;
            self.state = ConnectionState::Closed;
            return Err(e);
        }
        match transfer_error {
            Some(e) => Err(e),
            None => Ok(text),
        }
    }

    /// Make the server's reply size match `size`
    async fn ensure_reply_size(&mut self, size: i64) -> Result<()> {
        if self.server_reply_size == Some(size) {
            return Ok(());
        }
        debug!(size, "setting reply size");
        self.command(&Command::ReplySize(size)).await?;
        self.server_reply_size = Some(size);
        Ok(())
    }

    /// Run SQL text with `policy` and hand out the first result
    async fn execute(&mut self, sql: &str, policy: &FetchPolicy) -> Result<ExecuteResult> {
        self.discard_pending().await?;

        let mut batch = BatchPolicy::new(policy, self.capabilities.binary_level);
        let reply_size = batch.new_query();
        self.ensure_reply_size(reply_size).await?;

        let text = self.request(&Command::Sql(sql.to_string())).await?;
        let response = match Response::parse(&text) {
            Ok(response) => response,
            Err(e) => {
                // results opened before the failing statement
                self.abandoned.extend(Response::unfinished_tables(&text));
                return Err(e);
            }
        };
        self.pending = response.replies.into();
        self.pending_policy = Some((batch, policy.effective_arraysize()));
        self.next_outcome()
    }

    /// Turn the next queued reply into a caller-facing result
    fn next_outcome(&mut self) -> Result<ExecuteResult> {
        let Some(reply) = self.pending.pop_front() else {
            return Ok(ExecuteResult::Empty);
        };
        let outcome = match reply {
            Reply::Table(table) => {
                let (policy, arraysize) = self.pending_policy.clone().ok_or_else(|| {
                    Error::InvalidState("result without a fetch policy".to_string())
                })?;
                let (id, unfinished) = (table.id, (table.rows.len() as u64) < table.row_count);
                let rs = ResultSet::from_reply(
                    table,
                    policy,
                    arraysize,
                    self.capabilities.endian,
                    self.session_offset,
                );
                let rs = match rs {
                    Ok(rs) => rs,
                    Err(e) => {
                        if unfinished {
                            self.abandoned.push(id);
                        }
                        return Err(e);
                    }
                };
                let info = rs.info();
                debug!(id, rows = info.row_count, initial = info.rows_in_reply, "result set opened");
                self.result_sets.insert(id, rs);
                self.current = Some(id);
                ExecuteResult::ResultSet(info)
            }
            Reply::Update { affected, last_id } => ExecuteResult::Update { affected, last_id },
            Reply::Schema => ExecuteResult::Schema,
            Reply::Transaction { autocommit } => {
                self.autocommit = autocommit;
                ExecuteResult::Transaction { autocommit }
            }
            Reply::Prepare(table) => {
                let stmt = PreparedStatement::from_reply(&table)?;
                debug!(id = stmt.id, parameters = stmt.parameter_count(), "statement prepared");
                self.statements.insert(stmt.id, stmt.clone());
                ExecuteResult::Prepared(stmt)
            }
            Reply::Block(block) => {
                return Err(Error::protocol(format!(
                    "unexpected continuation of result {} in query response",
                    block.id
                )))
            }
        };
        Ok(outcome)
    }

    /// Drop queued results of the previous command, closing result sets the
    /// server still holds
    async fn discard_pending(&mut self) -> Result<()> {
        let pending: Vec<Reply> = self.pending.drain(..).collect();
        self.pending_policy = None;
        for reply in pending {
            if let Reply::Table(table) = reply {
                if (table.rows.len() as u64) < table.row_count {
                    self.abandoned.push(table.id);
                }
            }
        }
        while !self.abandoned.is_empty() {
            let id = self.abandoned.remove(0);
            debug!(id, "closing abandoned result set");
            self.command(&Command::Close(id)).await?;
        }
        Ok(())
    }

    /// Close the result set most recently handed out and move to the next
    /// queued result
    async fn next_result(&mut self) -> Result<Option<ExecuteResult>> {
        if let Some(id) = self.current.take() {
            if self.result_sets.contains_key(&id) {
                self.close_result(id).await?;
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.next_outcome().map(Some)
    }

    async fn close_result(&mut self, id: u64) -> Result<()> {
        let rs = self
            .result_sets
            .remove(&id)
            .ok_or(Error::ResultSetClosed(id))?;
        if self.current == Some(id) {
            self.current = None;
        }
        if rs.open_on_server() {
            debug!(id, "closing result set");
            self.command(&Command::Close(id)).await?;
        }
        Ok(())
    }

    /// Send an export command and add its rows to the result set
    async fn export(&mut self, id: u64, command: Command) -> Result<()> {
        let count = match &command {
            Command::Export { count, .. } | Command::ExportBinary { count, .. } => *count,
            _ => 0,
        };

        if command.expects_binary() {
            let columns = self.result_set_mut(id)?.column_count();
            let endian = self.capabilities.endian;
            trace!(command = %command, "sending command");
            let stream = self.stream_mut()?;
            stream.write_text(&command.encode()).await?;
            let data = stream.read_message().await?;
            match text_reply(&data, endian, columns) {
                Some(text) => {
                    debug!(id, "server answered binary export with text");
                    let response = Response::parse(text)?;
                    self.ingest_block(id, response)
                }
                None => self.result_set_mut(id)?.ingest_binary(data, count),
            }
        } else {
            let response = self.command(&command).await?;
            self.ingest_block(id, response)
        }
    }

    fn ingest_block(&mut self, id: u64, response: Response) -> Result<()> {
        let block = response
            .replies
            .into_iter()
            .find_map(|r| match r {
                Reply::Block(block) => Some(block),
                _ => None,
            })
            .ok_or_else(|| Error::protocol(format!("export of result {} returned no rows", id)))?;
        self.result_set_mut(id)?.ingest_text(block)
    }

    async fn fetch_one(&mut self, id: u64) -> Result<Option<Row>> {
        let rs = self.result_set_mut(id)?;
        if rs.cached() == 0 {
            match rs.next_request(0, 1) {
                Some(command) => self.export(id, command).await?,
                None => return Ok(None),
            }
        }
        Ok(self.result_set_mut(id)?.take(1).pop())
    }

    async fn fetch_many(&mut self, id: u64, n: usize) -> Result<Vec<Row>> {
        let mut rows = self.result_set_mut(id)?.take(n);
        while rows.len() < n {
            let used = rows.len();
            let Some(command) = self
                .result_set_mut(id)?
                .next_request(used as u64, (n - used) as u64)
            else {
                break;
            };
            self.export(id, command).await?;
            let more = self.result_set_mut(id)?.take(n - used);
            if more.is_empty() {
                break;
            }
            rows.extend(more);
        }
        Ok(rows)
    }

    async fn fetch_all(&mut self, id: u64) -> Result<Vec<Row>> {
        let rs = self.result_set_mut(id)?;
        let mut rows = rs.take(usize::MAX);
        if let Some(command) = rs.full_request() {
            self.export(id, command).await?;
            rows.extend(self.result_set_mut(id)?.take(usize::MAX));
        }
        Ok(rows)
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let policy = self.fetch.clone();
        match self.execute(sql, &policy).await? {
            ExecuteResult::ResultSet(info) => {
                let rows = self.fetch_all(info.id).await?;
                self.close_result(info.id).await?;
                Ok(QueryResult {
                    columns: info.columns,
                    rows,
                    rows_affected: 0,
                    last_id: None,
                })
            }
            ExecuteResult::Update { affected, last_id } => Ok(QueryResult {
                rows_affected: affected.max(0) as u64,
                last_id,
                ..QueryResult::empty()
            }),
            _ => Ok(QueryResult::empty()),
        }
    }

    /// Close everything the server holds for this session, best effort
    async fn shutdown(&mut self) {
        let open: Vec<u64> = self
            .result_sets
            .values()
            .filter(|rs| rs.open_on_server())
            .map(|rs| rs.id())
            .chain(self.abandoned.drain(..))
            .collect();
        let statements: Vec<u64> = self.statements.keys().copied().collect();
        self.result_sets.clear();
        self.statements.clear();
        self.pending.clear();
        self.current = None;

        if self.state == ConnectionState::Ready {
            let commands = open
                .into_iter()
                .map(Command::Close)
                .chain(statements.into_iter().map(Command::Release));
            for command in commands {
                if let Err(e) = self.command(&command).await {
                    warn!(command = %command, error = %e, "cleanup command failed");
                    if e.is_fatal() {
                        break;
                    }
                }
            }
        }

        self.force_close().await;
    }

    async fn force_close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close().await {
                warn!(error = %e, "error while closing connection");
            }
        }
        self.state = ConnectionState::Closed;
    }
}

/// Split a message ending in a file transfer request into the text before
/// the prompt and the transfer command
fn split_transfer_request(message: &str) -> Option<(&str, &str)> {
    let bytes = message.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let newline = bytes[..bytes.len() - 1].iter().rposition(|&b| b == b'\n')?;
    let prompt_start = newline.checked_sub(2)?;
    if &bytes[prompt_start..=newline] != prompt::FILE_TRANSFER.as_bytes() {
        return None;
    }
    Some((&message[..prompt_start], &message[newline + 1..]))
}

/// A binary export reply that the server sent as text instead.
///
/// Binary data may start with the same bytes as a text reply, so text is
/// only assumed for a complete line that has no valid column trailer.
fn text_reply(data: &Bytes, endian: Endian, columns: usize) -> Option<&str> {
    let looks_textual = (data.starts_with(b"&6 ") || data.starts_with(b"!")) && data.ends_with(b"\n");
    if !looks_textual || has_binary_trailer(data, endian, columns) {
        return None;
    }
    std::str::from_utf8(data).ok()
}

fn time_zone_sql(seconds_east: i32) -> String {
    let sign = if seconds_east < 0 { '-' } else { '+' };
    let minutes = seconds_east.unsigned_abs() / 60;
    format!(
        "SET TIME ZONE INTERVAL '{}{:02}:{:02}' HOUR TO MINUTE",
        sign,
        minutes / 60,
        minutes % 60
    )
}

fn schema_sql(schema: &str) -> String {
    format!("SET SCHEMA \"{}\"", schema.replace('"', "\"\""))
}

/// Result of a successful login
struct Login {
    stream: BlockStream,
    challenge: Challenge,
    capabilities: Capabilities,
    options: Vec<HandshakeOption>,
    target: Config,
    redirects: usize,
    message: Option<String>,
}

fn requested_capabilities(config: &Config) -> RequestedCapabilities {
    RequestedCapabilities {
        binary: config.fetch.binary.requested(),
        file_transfer: config.file_transfer,
        client_info: config.client_info,
    }
}

fn handshake_options(config: &Config, binary_level: u32) -> Vec<HandshakeOption> {
    let policy = BatchPolicy::new(&config.fetch, binary_level);
    vec![
        HandshakeOption::auto_commit(config.autocommit),
        HandshakeOption::reply_size(policy.effective_reply_size()),
        HandshakeOption::size_header(true),
        HandshakeOption::time_zone(config.timezone_offset_seconds()),
    ]
}

/// Authenticate over `transport`, following redirects
async fn login(config: &Config, transport: Box<dyn Transport>) -> Result<Login> {
    let mut target = config.clone();
    let mut transport = transport;
    let mut redirects = 0;

    'connect: loop {
        let mut stream = BlockStream::new(transport);
        let prime = if target.unix_socket.is_some() {
            UNIX_SOCKET_PRIME
        } else {
            TCP_PRIME
        };
        stream.send_raw(prime).await?;

        loop {
            let text = stream.read_text().await?;
            let challenge = Challenge::parse(&text)?;
            let capabilities = Capabilities::negotiate(requested_capabilities(config), &challenge);
            debug!(
                server = %challenge.server_type,
                hashes = ?challenge.hashes,
                options_level = challenge.options_level,
                binary_level = challenge.binary_level,
                "received challenge"
            );

            let mut options = handshake_options(config, capabilities.binary_level);
            let auth = AuthMessage::new(
                target.username.as_str(),
                target.password(),
                target.language.as_str(),
                target.database.as_str(),
            );
            let response = auth.build_response(&challenge, &capabilities, &mut options)?;
            stream.write_text(&response).await?;

            let reply = stream.read_text().await?;
            let redirect = match AuthResult::parse(&reply)? {
                AuthResult::Ok(message) => {
                    return Ok(Login {
                        stream,
                        challenge,
                        capabilities,
                        options,
                        target,
                        redirects,
                        message,
                    })
                }
                AuthResult::Redirect(redirect) => redirect,
            };

            redirects += 1;
            if redirects > config.max_redirects {
                let _ = stream.close().await;
                return Err(Error::TooManyRedirects(config.max_redirects));
            }
            match redirect {
                Redirect::Proxy => {
                    info!("proxy redirect, logging in again");
                }
                Redirect::Server {
                    host,
                    port,
                    database,
                } => {
                    info!(host = %host, port, database = %database, "redirected to another server");
                    let _ = stream.close().await;
                    target.unix_socket = None;
                    target.host = host;
                    target.port = port;
                    if !database.is_empty() {
                        target.database = database;
                    }
                    transport = transport::open(&target, &target.host, target.port).await?;
                    continue 'connect;
                }
            }
        }
    }
}

/// A connection to a MonetDB database
///
/// # Example
///
/// ```rust,no_run
/// use monetdb_rs::{Config, Connection};
///
/// # async fn example() -> monetdb_rs::Result<()> {
/// let config = Config::new("localhost", 50000, "demo", "monetdb", "monetdb")
///     .autocommit(true);
/// let conn = Connection::connect_with_config(config).await?;
/// let result = conn.query("SELECT 42").await?;
/// assert_eq!(result.rows[0].get_i64(0), Some(42));
/// # Ok(())
/// # }
/// ```
///
/// # Thread Safety
///
/// `Connection` is `Send` and `Sync`, but operations are serialized internally
/// via a mutex: at most one command is in flight per session. For parallel
/// query execution, use multiple connections.
pub struct Connection {
    inner: Arc<Mutex<ConnectionInner>>,
    config: Config,
    closed: AtomicBool,
    id: u32,
}

// Connection ID counter
static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

impl Connection {
    /// Create a new connection to a MonetDB database
    pub async fn connect(
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        Self::connect_with_config(Config::new(host, port, database, username, password)).await
    }

    /// Create a new connection using a [`Config`].
    ///
    /// This is the preferred way to create connections as it gives full control
    /// over connection parameters including TLS, timeouts and fetch settings.
    pub async fn connect_with_config(config: Config) -> Result<Self> {
        config.validate()?;
        debug!(target = %config.target(), "connecting");
        let transport = transport::open(&config, &config.host, config.port).await?;
        Self::connect_with_transport(transport, config).await
    }

    /// Log in over an already open transport.
    ///
    /// Redirects to other servers open new transports from the configuration.
    pub async fn connect_with_transport(
        transport: Box<dyn Transport>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let login = tokio::time::timeout(config.connect_timeout, login(&config, transport))
            .await
            .map_err(|_| Error::ConnectionTimeout(config.connect_timeout))??;

        let offset_seconds = config.timezone_offset_seconds();
        let session_offset = FixedOffset::east_opt(offset_seconds).ok_or_else(|| {
            Error::InvalidConfig(format!("time zone offset out of range: {}s", offset_seconds))
        })?;
        if config.fetch.binary == BinaryMode::On && !login.capabilities.supports_binary() {
            warn!("binary result sets requested but not supported by the server");
        }

        let hash_algorithm = login.challenge.select_algorithm()?.name().to_string();
        let server_info = ServerInfo {
            server_type: login.challenge.server_type.clone(),
            host: login.target.host.clone(),
            port: login.target.port,
            database: login.target.database.clone(),
            protocol_version: login.challenge.protocol.clone(),
            hash_algorithm,
            capabilities: login.capabilities,
            redirects: login.redirects,
            messages: login.message.into_iter().collect(),
        };
        debug!(capabilities = ?login.capabilities, "logged in");

        let inner = ConnectionInner {
            stream: Some(login.stream),
            state: ConnectionState::Connected,
            server_info,
            capabilities: login.capabilities,
            fetch: config.fetch.clone(),
            session_offset,
            autocommit: config.autocommit,
            server_reply_size: None,
            result_sets: HashMap::new(),
            statements: HashMap::new(),
            pending: VecDeque::new(),
            pending_policy: None,
            current: None,
            abandoned: Vec::new(),
            transfer_handler: None,
        };

        let conn = Connection {
            inner: Arc::new(Mutex::new(inner)),
            config,
            closed: AtomicBool::new(false),
            id,
        };

        if let Err(e) = conn.setup_session(&login.options).await {
            let mut inner = conn.inner.lock().await;
            inner.force_close().await;
            conn.closed.store(true, Ordering::Relaxed);
            return Err(e);
        }
        Ok(conn)
    }

    /// Apply the options the login response could not carry, then client
    /// info and schema
    async fn setup_session(&self, options: &[HandshakeOption]) -> Result<()> {
        let mut inner = self.inner.lock().await;

        for option in options {
            if option.sent {
                if option.name == "reply_size" {
                    inner.server_reply_size = Some(option.value);
                }
                continue;
            }
            debug!(option = option.name, value = option.value, "applying option after login");
            match option.name {
                "auto_commit" => {
                    inner.command(&Command::AutoCommit(option.value != 0)).await?;
                }
                "reply_size" => inner.ensure_reply_size(option.value).await?,
                "size_header" => {
                    inner.command(&Command::SizeHeader(option.value != 0)).await?;
                }
                "time_zone" => {
                    let sql = time_zone_sql(option.value as i32);
                    inner.command(&Command::Sql(sql)).await?;
                }
                _ => {}
            }
        }

        if inner.capabilities.client_info {
            let client_info = ClientInfo::current(
                self.config.client_application.clone(),
                self.config.client_remark.clone(),
            );
            if let Err(e) = inner.command(&Command::ClientInfo(client_info)).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(error = %e, "server rejected client info");
            }
        }

        if let Some(schema) = &self.config.schema {
            inner.command(&Command::Sql(schema_sql(schema))).await?;
        }

        inner.state = ConnectionState::Ready;
        Ok(())
    }

    /// Force-close on fatal errors and keep the closed flag in sync
    async fn guard<T>(&self, inner: &mut ConnectionInner, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && inner.state != ConnectionState::Closed {
                warn!(error = %e, "fatal error, closing connection");
                inner.force_close().await;
            }
        }
        if inner.state == ConnectionState::Closed {
            self.closed.store(true, Ordering::Relaxed);
        }
        result
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionNotReady);
        }
        Ok(())
    }

    /// Get the connection ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Configuration this connection was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get server information
    pub async fn server_info(&self) -> ServerInfo {
        let inner = self.inner.lock().await;
        inner.server_info.clone()
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        let inner = self.inner.lock().await;
        inner.state
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Execute SQL text and return its first result.
    ///
    /// When the text holds several statements, the remaining results are
    /// kept and handed out by [`Connection::next_result`]. Results still
    /// queued from the previous call are discarded first.
    pub async fn execute(&self, sql: &str) -> Result<ExecuteResult> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let policy = inner.fetch.clone();
        let result = inner.execute(sql, &policy).await;
        self.guard(&mut inner, result).await
    }

    /// Execute SQL text with fetch settings for this statement only
    pub async fn execute_with(&self, sql: &str, policy: &FetchPolicy) -> Result<ExecuteResult> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.execute(sql, policy).await;
        self.guard(&mut inner, result).await
    }

    /// Close the current result set and return the next queued result, or
    /// `None` when there is none
    pub async fn next_result(&self) -> Result<Option<ExecuteResult>> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.next_result().await;
        self.guard(&mut inner, result).await
    }

    /// Execute a query and fetch all of its rows.
    ///
    /// For statements without a result set the row count is reported in
    /// `rows_affected`.
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.query(sql).await;
        self.guard(&mut inner, result).await
    }

    /// Send a raw MAPI command (for example `Xreply_size 50`) and return the
    /// parsed response
    pub async fn raw_command(&self, command: &str) -> Result<Response> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = async {
            let stream = inner.stream_mut()?;
            trace!(command, "sending raw command");
            stream.write_text(command).await?;
            let text = inner.read_response().await?;
            Response::parse(&text)
        }
        .await;
        self.guard(&mut inner, result).await
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Fetch the next row of a result set; `None` at the end
    pub async fn fetch_one(&self, id: u64) -> Result<Option<Row>> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.fetch_one(id).await;
        self.guard(&mut inner, result).await
    }

    /// Fetch up to `n` rows; fewer only at the end of the result set
    pub async fn fetch_many(&self, id: u64, n: usize) -> Result<Vec<Row>> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.fetch_many(id, n).await;
        self.guard(&mut inner, result).await
    }

    /// Fetch the next `arraysize` rows
    pub async fn fetch_next_batch(&self, id: u64) -> Result<Vec<Row>> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = match inner.result_set_mut(id).map(|rs| rs.arraysize()) {
            Ok(n) => inner.fetch_many(id, n).await,
            Err(e) => Err(e),
        };
        self.guard(&mut inner, result).await
    }

    /// Fetch all remaining rows in one request
    pub async fn fetch_all(&self, id: u64) -> Result<Vec<Row>> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.fetch_all(id).await;
        self.guard(&mut inner, result).await
    }

    /// Close a result set, releasing it on the server if it still holds rows
    pub async fn close_result(&self, id: u64) -> Result<()> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner.close_result(id).await;
        self.guard(&mut inner, result).await
    }

    /// Description of an open result set
    pub async fn result_set_info(&self, id: u64) -> Result<ResultSetInfo> {
        let mut inner = self.inner.lock().await;
        Ok(inner.result_set_mut(id)?.info())
    }

    /// Whether the most recent batch of a result set arrived in binary
    pub async fn last_batch_binary(&self, id: u64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.result_set_mut(id)?.last_batch_binary())
    }

    /// Rows of a result set not yet handed out
    pub async fn rows_remaining(&self, id: u64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        Ok(inner.result_set_mut(id)?.remaining())
    }

    /// Change the batch size [`Connection::fetch_next_batch`] uses for one
    /// result set
    pub async fn set_result_arraysize(&self, id: u64, arraysize: NonZeroUsize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.result_set_mut(id)?.set_arraysize(arraysize.get());
        Ok(())
    }

    /// Ids of the open result sets
    pub async fn open_result_sets(&self) -> Vec<u64> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<u64> = inner.result_sets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // =========================================================================
    // Fetch settings
    // =========================================================================

    /// Session fetch settings
    pub async fn fetch_policy(&self) -> FetchPolicy {
        self.inner.lock().await.fetch.clone()
    }

    /// Rows the server includes in the reply to a query; -1 for all.
    ///
    /// Takes effect with the next query.
    pub async fn set_replysize(&self, replysize: i64) {
        self.inner.lock().await.fetch.replysize = replysize;
    }

    /// Bound on rows fetched ahead of the consumer; -1 unbounded, 0 none
    pub async fn set_maxprefetch(&self, maxprefetch: i64) {
        self.inner.lock().await.fetch.maxprefetch = maxprefetch;
    }

    /// Default batch size for [`Connection::fetch_next_batch`]
    pub async fn set_arraysize(&self, arraysize: NonZeroUsize) {
        self.inner.lock().await.fetch.arraysize = Some(arraysize);
    }

    /// Whether result batches may use binary export
    pub async fn set_binary(&self, binary: BinaryMode) {
        let mut inner = self.inner.lock().await;
        if binary == BinaryMode::On && !inner.capabilities.supports_binary() {
            warn!("binary result sets requested but not supported by the server");
        }
        inner.fetch.binary = binary;
    }

    // =========================================================================
    // Prepared statements
    // =========================================================================

    /// Prepare a statement with `?` placeholders
    pub async fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        match self.execute(&format!("PREPARE {}", sql)).await? {
            ExecuteResult::Prepared(stmt) => Ok(stmt),
            other => Err(Error::protocol(format!(
                "PREPARE returned {:?} instead of a statement",
                other
            ))),
        }
    }

    /// Execute a prepared statement with already rendered SQL literals
    pub async fn execute_prepared(
        &self,
        stmt: &PreparedStatement,
        literals: &[&str],
    ) -> Result<ExecuteResult> {
        {
            let inner = self.inner.lock().await;
            if !inner.statements.contains_key(&stmt.id) {
                return Err(Error::StatementNotOpen(stmt.id));
            }
        }
        if literals.len() != stmt.parameter_count() {
            return Err(Error::InvalidState(format!(
                "statement {} takes {} parameters, got {}",
                stmt.id,
                stmt.parameter_count(),
                literals.len()
            )));
        }
        self.execute(&stmt.execute_sql(literals)).await
    }

    /// Release a prepared statement on the server
    pub async fn release(&self, stmt: &PreparedStatement) -> Result<()> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        if inner.statements.remove(&stmt.id).is_none() {
            return Err(Error::StatementNotOpen(stmt.id));
        }
        let result = inner.command(&Command::Release(stmt.id)).await.map(|_| ());
        self.guard(&mut inner, result).await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Current autocommit state
    pub async fn autocommit(&self) -> bool {
        self.inner.lock().await.autocommit
    }

    /// Turn autocommit on or off
    pub async fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock().await;
        let result = inner
            .command(&Command::AutoCommit(autocommit))
            .await
            .map(|_| inner.autocommit = autocommit);
        self.guard(&mut inner, result).await
    }

    /// Commit the current transaction
    pub async fn commit(&self) -> Result<()> {
        self.execute("COMMIT").await?;
        Ok(())
    }

    /// Roll back the current transaction
    pub async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK").await?;
        Ok(())
    }

    // =========================================================================
    // File transfers
    // =========================================================================

    /// Register the handler for `ON CLIENT` file transfers
    pub async fn set_transfer_handler(&self, handler: Arc<dyn TransferHandler>) {
        self.inner.lock().await.transfer_handler = Some(handler);
    }

    /// Remove the transfer handler; requests are then refused
    pub async fn clear_transfer_handler(&self) {
        self.inner.lock().await.transfer_handler = None;
    }

    /// Close the connection.
    ///
    /// Open result sets and prepared statements are released on a best
    /// effort basis; failures are logged and do not stop the teardown.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.shutdown().await;
        debug!(id = self.id, "connection closed");
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Can't do async cleanup in Drop; callers should call close()
        self.closed.store(true, Ordering::Relaxed);
    }
}
