//! Transport layer for MonetDB connections
//!
//! A transport is a plain byte pipe: TCP, a Unix-domain socket, or TLS over
//! TCP. Block framing lives one layer up in [`crate::block`], so anything that
//! implements `AsyncRead + AsyncWrite` can carry a session, including the
//! in-memory pipes used by the tests.

mod tcp;
pub mod tls;
#[cfg(unix)]
mod unix;

pub use tcp::TcpTransport;
pub use tls::{connect_tls, TlsConfig};
#[cfg(unix)]
pub use unix::connect_unix;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};

/// Trait for transport implementations
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send raw bytes to the server
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive up to `buf.len()` bytes; `Ok(0)` means the peer closed the stream
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// [`Transport`] over any async byte stream
pub struct StreamTransport<S> {
    stream: Option<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}

#[async_trait::async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data).await.map_err(Error::Io)?;
        stream.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream_mut()?;
        match stream.read(buf).await {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.map_err(Error::Io)?;
        }
        Ok(())
    }
}

/// Open the transport described by `config`, targeting `host:port`.
///
/// A configured Unix socket takes precedence over TCP. TLS, when configured,
/// is negotiated here, before any MAPI bytes are exchanged.
pub async fn open(config: &Config, host: &str, port: u16) -> Result<Box<dyn Transport>> {
    #[cfg(unix)]
    if let Some(path) = &config.unix_socket {
        let stream = connect_unix(path, config.connect_timeout).await?;
        return Ok(Box::new(StreamTransport::new(stream)));
    }

    let tcp = TcpTransport::new()
        .connect_timeout(config.connect_timeout)
        .connect(host, port)
        .await?;

    match &config.tls {
        Some(tls_config) => {
            let tls = connect_tls(tcp, host, tls_config).await?;
            Ok(Box::new(StreamTransport::new(tls)))
        }
        None => Ok(Box::new(StreamTransport::new(tcp))),
    }
}

/// Shut a transport down, logging instead of failing
pub(crate) async fn close_quietly(transport: &mut dyn Transport) {
    if let Err(e) = transport.close().await {
        warn!(error = %e, "error while closing transport");
    }
}
