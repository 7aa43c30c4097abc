//! Transfer handler confined to one directory

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::{Download, TransferHandler, Upload};
use crate::error::Result;

/// Serves uploads from and downloads into files below a root directory.
///
/// Names that resolve outside the root, through `..`, absolute paths or
/// symbolic links, are refused with `Forbidden`. Text uploads skip the
/// number of lines the server asks to skip.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use monetdb_rs::{Config, Connection, SafeDirectoryHandler};
///
/// # async fn example() -> monetdb_rs::Result<()> {
/// let conn = Connection::connect_with_config(Config::new("localhost", 50000, "demo", "monetdb", "monetdb")).await?;
/// conn.set_transfer_handler(Arc::new(SafeDirectoryHandler::new("/srv/data"))).await;
/// conn.execute("COPY INTO t FROM 'input.csv' ON CLIENT").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SafeDirectoryHandler {
    root: PathBuf,
}

impl SafeDirectoryHandler {
    /// Create a handler rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` below the root; `None` when it escapes the root
    pub async fn resolve(&self, name: &str) -> Option<PathBuf> {
        let root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let joined = root.join(name);
        let resolved = match tokio::fs::canonicalize(&joined).await {
            Ok(path) => path,
            Err(_) => {
                // the file may not exist yet; resolve its directory instead
                let file = match joined.components().next_back()? {
                    Component::Normal(file) => file.to_owned(),
                    _ => return None,
                };
                let parent = joined.parent()?;
                tokio::fs::canonicalize(parent).await.ok()?.join(file)
            }
        };
        (resolved.starts_with(&root) && resolved != root).then_some(resolved)
    }
}

#[async_trait]
impl TransferHandler for SafeDirectoryHandler {
    async fn handle_upload(&self, upload: &mut Upload<'_>) -> Result<()> {
        let name = upload.request().name.clone();
        let Some(path) = self.resolve(&name).await else {
            warn!(name, "refusing upload outside the transfer directory");
            return upload.refuse("Forbidden").await;
        };
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => return upload.refuse(&e.to_string()).await,
        };

        if upload.request().text {
            let skip = upload.request().skip_amount;
            let mut reader = BufReader::new(file);
            let mut line = Vec::new();
            for _ in 0..skip {
                line.clear();
                if reader.read_until(b'\n', &mut line).await? == 0 {
                    break;
                }
            }
            let mut writer = upload.text_writer().await?;
            writer.copy_from(&mut reader).await?;
        } else {
            let mut file = file;
            let mut writer = upload.binary_writer().await?;
            writer.copy_from(&mut file).await?;
        }
        upload.close().await
    }

    async fn handle_download(&self, download: &mut Download<'_>) -> Result<()> {
        let name = download.request().name.clone();
        let Some(path) = self.resolve(&name).await else {
            warn!(name, "refusing download outside the transfer directory");
            return download.refuse("Forbidden").await;
        };
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => return download.refuse(&e.to_string()).await,
        };

        let mut reader = if download.request().text {
            download.text_reader().await?
        } else {
            download.binary_reader().await?
        };
        reader.copy_to(&mut file).await?;
        Ok(())
    }
}
