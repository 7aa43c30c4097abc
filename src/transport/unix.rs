//! Unix-domain socket transport

use std::path::Path;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};

/// Connect to a server's Unix-domain socket, typically `/tmp/.s.monetdb.<port>`
pub async fn connect_unix(path: &Path, connect_timeout: Duration) -> Result<UnixStream> {
    let stream = timeout(connect_timeout, UnixStream::connect(path))
        .await
        .map_err(|_| Error::ConnectionTimeout(connect_timeout))?
        .map_err(Error::Io)?;
    debug!(path = %path.display(), "Unix socket connection established");
    Ok(stream)
}
