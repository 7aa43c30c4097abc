//! Downloads: the server sends data for the client to store
//!
//! Accepting a download sends an empty line; the server then sends the data
//! as one message. Whatever the handler leaves unread is drained when the
//! download is closed.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{with_newline, TransferRequest};
use crate::block::BlockStream;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadState {
    Pending,
    Streaming,
    Refused,
    Finished,
}

/// A download request being served
pub struct Download<'a> {
    stream: &'a mut BlockStream,
    request: TransferRequest,
    state: DownloadState,
    bytes_received: u64,
    utf8_tail: Vec<u8>,
}

impl<'a> Download<'a> {
    pub(crate) fn new(stream: &'a mut BlockStream, request: TransferRequest) -> Self {
        Self {
            stream,
            request,
            state: DownloadState::Pending,
            bytes_received: 0,
            utf8_tail: Vec::new(),
        }
    }

    /// The request being served
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Bytes received so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state == DownloadState::Pending
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state == DownloadState::Streaming
    }

    /// Refuse the download with a message for the server
    pub async fn refuse(&mut self, message: &str) -> Result<()> {
        if self.state != DownloadState::Pending {
            return Err(Error::InvalidState(
                "cannot refuse a download that has already started".to_string(),
            ));
        }
        debug!(name = %self.request.name, message, "refusing download");
        self.stream.write_text(&with_newline(message)).await?;
        self.state = DownloadState::Refused;
        Ok(())
    }

    /// Accept the download and get a reader for the raw bytes
    pub async fn binary_reader(&mut self) -> Result<DownloadReader<'_, 'a>> {
        self.accept().await?;
        Ok(DownloadReader {
            download: self,
            text: false,
        })
    }

    /// Accept the download and get a reader that checks the data is UTF-8
    pub async fn text_reader(&mut self) -> Result<DownloadReader<'_, 'a>> {
        self.accept().await?;
        Ok(DownloadReader {
            download: self,
            text: true,
        })
    }

    async fn accept(&mut self) -> Result<()> {
        match self.state {
            DownloadState::Pending => {
                debug!(name = %self.request.name, "accepting download");
                self.stream.write_text("\n").await?;
                self.state = DownloadState::Streaming;
                Ok(())
            }
            DownloadState::Streaming | DownloadState::Finished => Ok(()),
            DownloadState::Refused => {
                Err(Error::InvalidState("download has been refused".to_string()))
            }
        }
    }

    /// Next block of data; `None` once the server has sent everything
    async fn next_block(&mut self) -> Result<Option<Bytes>> {
        if self.state != DownloadState::Streaming {
            return Ok(None);
        }
        let block = self.stream.read_block(false).await?;
        if block.last {
            debug!(name = %self.request.name, received = self.bytes_received + block.payload.len() as u64, "download finished");
            self.state = DownloadState::Finished;
        }
        self.bytes_received += block.payload.len() as u64;
        Ok(Some(block.payload))
    }

    /// Finish the download, discarding unread data. Calling it again does
    /// nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == DownloadState::Pending {
            self.accept().await?;
        }
        while self.next_block().await?.is_some() {}
        Ok(())
    }

    pub(crate) async fn abort(&mut self) {
        self.stream.sabotage().await;
        self.state = DownloadState::Finished;
    }
}

/// Reader for an accepted download
pub struct DownloadReader<'d, 'a> {
    download: &'d mut Download<'a>,
    text: bool,
}

impl DownloadReader<'_, '_> {
    /// Next non-empty chunk of raw bytes; `None` at the end
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        while let Some(chunk) = self.download.next_block().await? {
            if !chunk.is_empty() {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    }

    /// Next chunk as text; `None` at the end.
    ///
    /// A character split across chunks is returned with the chunk that
    /// completes it.
    pub async fn read_text(&mut self) -> Result<Option<String>> {
        loop {
            let Some(chunk) = self.read_chunk().await? else {
                if self.download.utf8_tail.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Transfer(
                    "download ended in the middle of a UTF-8 character".to_string(),
                ));
            };

            let mut data = std::mem::take(&mut self.download.utf8_tail);
            data.extend_from_slice(&chunk);
            let valid = match std::str::from_utf8(&data) {
                Ok(_) => data.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(e) => {
                    return Err(Error::Transfer(format!(
                        "download is not valid UTF-8: {}",
                        e
                    )))
                }
            };
            self.download.utf8_tail = data.split_off(valid);
            if data.is_empty() {
                continue;
            }
            return String::from_utf8(data)
                .map(Some)
                .map_err(|e| Error::Transfer(format!("download is not valid UTF-8: {}", e)));
        }
    }

    /// Read everything that is left
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if self.text {
            while let Some(text) = self.read_text().await? {
                out.extend_from_slice(text.as_bytes());
            }
        } else {
            while let Some(chunk) = self.read_chunk().await? {
                out.extend_from_slice(&chunk);
            }
        }
        Ok(out)
    }

    /// Copy everything that is left into `writer`; returns the byte count
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut total = 0u64;
        if self.text {
            while let Some(text) = self.read_text().await? {
                writer.write_all(text.as_bytes()).await?;
                total += text.len() as u64;
            }
        } else {
            while let Some(chunk) = self.read_chunk().await? {
                writer.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
        }
        writer.flush().await?;
        Ok(total)
    }
}
