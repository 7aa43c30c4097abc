//! In-memory MAPI server for driving a `Connection` in tests
//!
//! The client end of a duplex pipe is handed to
//! `Connection::connect_with_transport`; the server end is wrapped in a
//! `BlockStream` so the test can script the server side message by message.

#![allow(dead_code)]

use bytes::Bytes;
use monetdb_rs::block::BlockStream;
use monetdb_rs::{Config, Connection, StreamTransport, Transport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::task::JoinHandle;

/// Challenge of a current server without binary export or client info
pub const CHALLENGE: &str = "s4lt:mserver:9:RIPEMD160,SHA512,SHA256:LIT:SHA512:sql=6:";

/// Challenge of a current server offering binary export
pub const BINARY_CHALLENGE: &str = "s4lt:mserver:9:SHA512:LIT:SHA512:sql=6:BINARY=1:";

/// Server side of a scripted session
pub struct MockServer {
    pub stream: BlockStream,
}

impl MockServer {
    /// Consume the two TCP priming bytes and wrap the pipe in block framing
    pub async fn accept<S>(io: S) -> (Self, Vec<u8>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::accept_primed(io, 2).await
    }

    /// Consume `prime_len` priming bytes and wrap the pipe in block framing
    pub async fn accept_primed<S>(mut io: S, prime_len: usize) -> (Self, Vec<u8>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut prime = vec![0u8; prime_len];
        io.read_exact(&mut prime).await.unwrap();
        let stream = BlockStream::new(Box::new(StreamTransport::new(io)));
        (Self { stream }, prime)
    }

    /// Send a text message
    pub async fn send(&mut self, text: &str) {
        self.stream.write_text(text).await.unwrap();
    }

    /// Send raw bytes as one message
    pub async fn send_bytes(&mut self, data: &[u8]) {
        self.stream.write_message(data).await.unwrap();
    }

    /// Receive one text message
    pub async fn recv(&mut self) -> String {
        self.stream.read_text().await.unwrap()
    }

    /// Receive one message as raw bytes
    pub async fn recv_bytes(&mut self) -> Bytes {
        self.stream.read_message().await.unwrap()
    }

    /// Send `challenge`, read the login response and accept it
    pub async fn login(&mut self, challenge: &str) -> String {
        self.send(challenge).await;
        let response = self.recv().await;
        self.send("").await;
        response
    }

    /// Expect `command` and answer it with `reply`
    pub async fn expect(&mut self, command: &str, reply: &str) {
        assert_eq!(self.recv().await, command);
        self.send(reply).await;
    }
}

/// Configuration used by the mock sessions
pub fn config() -> Config {
    Config::new("localhost", 50000, "demo", "monetdb", "monetdb").timezone_minutes(0)
}

/// A transport/server pipe pair
pub fn pipe() -> (Box<dyn Transport>, DuplexStream) {
    let (client, server) = tokio::io::duplex(1 << 20);
    (Box::new(StreamTransport::new(client)), server)
}

/// Connect `config` to a scripted server.
///
/// `script` runs on its own task with the server end after the priming
/// bytes have been read; the returned handle finishes when it does.
pub async fn connect<F, Fut>(config: Config, script: F) -> (Connection, JoinHandle<()>)
where
    F: FnOnce(MockServer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (transport, io) = pipe();
    let server = tokio::spawn(async move {
        let (server, prime) = MockServer::accept(io).await;
        assert_eq!(prime, vec![0, 0]);
        script(server).await;
    });
    let conn = Connection::connect_with_transport(transport, config)
        .await
        .unwrap();
    (conn, server)
}

/// `&1` header plus metadata for one `int` column named `n`, followed by
/// the values `0..rows`
pub fn int_table(id: u64, total: u64, rows: u64) -> String {
    let mut text = format!(
        "&1 {} {} 1 {}\n% sys.t # table_name\n% n # name\n% int # type\n% 1 # length\n% 32 0 # typesizes\n",
        id, total, rows
    );
    text.push_str(&int_rows(0, rows));
    text
}

/// Tuple lines for the values `first..first + count`
pub fn int_rows(first: u64, count: u64) -> String {
    (first..first + count)
        .map(|i| format!("[ {}\t]\n", i))
        .collect()
}

/// `&6` continuation block of `count` int rows starting at `offset`
pub fn int_block(id: u64, offset: u64, count: u64) -> String {
    format!("&6 {} 1 {} {}\n{}", id, count, offset, int_rows(offset, count))
}
