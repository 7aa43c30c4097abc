//! TCP transport implementation

use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Connects TCP streams for MAPI sessions
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Connection timeout, applied to each resolved address
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a connector with the default 10 second timeout
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve `host` and connect to the first address that accepts.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs: Vec<_> = timeout(self.connect_timeout, lookup_host((host, port)))
            .await
            .map_err(|_| Error::ConnectionTimeout(self.connect_timeout))?
            .map_err(Error::Io)?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            trace!(%addr, "trying address");
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true).map_err(Error::Io)?;
                    debug!(%addr, "TCP connection established");
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "connect failed");
                    last_error = Some(Error::Io(e));
                }
                Err(_) => {
                    debug!(%addr, "connect timed out");
                    last_error = Some(Error::ConnectionTimeout(self.connect_timeout));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for {}", host),
            ))
        }))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = TcpTransport::new()
            .connect_timeout(Duration::from_secs(5))
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        assert!(stream.nodelay().unwrap());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpTransport::new().connect("127.0.0.1", port).await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
