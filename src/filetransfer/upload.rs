//! Uploads: the client sends file contents to the server
//!
//! Accepting an upload sends an empty line; the data follows in the same
//! message. After every `chunk_size` bytes the client ends the message and
//! the server answers with a prompt: "more" to continue, or the file
//! transfer prompt when it has seen enough. The upload ends with an empty
//! message, which the server acknowledges with the file transfer prompt.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::{with_newline, TransferHandler, TransferRequest};
use crate::block::BlockStream;
use crate::constants::{prompt, DEFAULT_CHUNK_SIZE};
use crate::error::{Error, Result};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Pending,
    Streaming,
    Refused,
    Cancelled,
    Closed,
}

/// An upload request being served
pub struct Upload<'a> {
    stream: &'a mut BlockStream,
    handler: &'a dyn TransferHandler,
    request: TransferRequest,
    state: UploadState,
    chunk_size: usize,
    chunk_used: usize,
    bytes_sent: u64,
    pending_cr: bool,
}

impl<'a> Upload<'a> {
    pub(crate) fn new(
        stream: &'a mut BlockStream,
        handler: &'a dyn TransferHandler,
        request: TransferRequest,
    ) -> Self {
        Self {
            stream,
            handler,
            request,
            state: UploadState::Pending,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_used: 0,
            bytes_sent: 0,
            pending_cr: false,
        }
    }

    pub(crate) fn handler(&self) -> &'a dyn TransferHandler {
        self.handler
    }

    /// The request being served
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Set the number of bytes after which the server may stop the upload.
    ///
    /// 0 disables the checks.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size;
    }

    /// Whether the server has stopped the upload; further writes are discarded
    pub fn is_cancelled(&self) -> bool {
        self.state == UploadState::Cancelled
    }

    /// Bytes sent so far, including the acceptance line
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state == UploadState::Pending
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state == UploadState::Streaming
    }

    /// Refuse the upload with a message for the server.
    ///
    /// Only possible before a writer has been requested.
    pub async fn refuse(&mut self, message: &str) -> Result<()> {
        match self.state {
            UploadState::Pending => {
                debug!(name = %self.request.name, message, "refusing upload");
                self.stream.write_text(&with_newline(message)).await?;
                self.state = UploadState::Refused;
                Ok(())
            }
            UploadState::Cancelled => Ok(()),
            UploadState::Streaming => Err(Error::InvalidState(
                "cannot refuse an upload after data has been sent".to_string(),
            )),
            UploadState::Refused | UploadState::Closed => {
                Err(Error::InvalidState("upload already finished".to_string()))
            }
        }
    }

    /// Accept the upload and get a writer that passes bytes unchanged
    pub async fn binary_writer(&mut self) -> Result<UploadWriter<'_, 'a>> {
        self.start().await?;
        Ok(UploadWriter {
            upload: self,
            text: false,
        })
    }

    /// Accept the upload and get a writer that turns `\r\n` into `\n`
    pub async fn text_writer(&mut self) -> Result<UploadWriter<'_, 'a>> {
        self.start().await?;
        Ok(UploadWriter {
            upload: self,
            text: true,
        })
    }

    async fn start(&mut self) -> Result<()> {
        match self.state {
            UploadState::Pending => {
                debug!(name = %self.request.name, "accepting upload");
                self.send(b"\n", false).await?;
                self.state = UploadState::Streaming;
                Ok(())
            }
            UploadState::Streaming | UploadState::Cancelled => Ok(()),
            UploadState::Refused | UploadState::Closed => {
                Err(Error::InvalidState("upload already finished".to_string()))
            }
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            UploadState::Streaming => {}
            UploadState::Cancelled => return Ok(()),
            UploadState::Pending => {
                return Err(Error::InvalidState("upload has not been accepted".to_string()))
            }
            UploadState::Refused | UploadState::Closed => {
                return Err(Error::InvalidState("upload already finished".to_string()))
            }
        }

        if self.chunk_size == 0 {
            return self.send(data, false).await;
        }

        let mut pos = 0;
        while pos < data.len() {
            let room = self.chunk_size.saturating_sub(self.chunk_used);
            let n = (data.len() - pos).min(room);
            let chunk = &data[pos..pos + n];
            if n == room {
                if !self.send_and_get_prompt(chunk).await? {
                    debug!(name = %self.request.name, sent = self.bytes_sent, "server cancelled upload");
                    self.state = UploadState::Cancelled;
                    self.handler.cancel();
                    break;
                }
            } else {
                self.send(chunk, false).await?;
            }
            pos += n;
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8], finish: bool) -> Result<()> {
        if data.is_empty() && !finish {
            return Ok(());
        }
        self.stream.write_blocks(data, finish).await?;
        self.bytes_sent += data.len() as u64;
        self.chunk_used += data.len();
        Ok(())
    }

    /// End the current message with `data` and ask whether to go on
    async fn send_and_get_prompt(&mut self, data: &[u8]) -> Result<bool> {
        self.send(data, true).await?;
        let reply = self.stream.read_text().await?;
        match reply.as_str() {
            prompt::MORE => {
                self.chunk_used = 0;
                Ok(true)
            }
            prompt::FILE_TRANSFER => Ok(false),
            other => Err(Error::protocol(format!(
                "unexpected server response during upload: {:?}",
                truncate(other)
            ))),
        }
    }

    /// Finish the upload. Calling it again does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == UploadState::Pending {
            self.start().await?;
        }
        if self.state != UploadState::Streaming {
            return Ok(());
        }

        if self.pending_cr {
            self.pending_cr = false;
            self.send_data(b"\r").await?;
            if self.state != UploadState::Streaming {
                return Ok(());
            }
        }

        let wants_more = if self.chunk_used != 0 {
            self.send_and_get_prompt(&[]).await?
        } else {
            true
        };
        if wants_more {
            self.stream.write_message(&[]).await?;
            let reply = self.stream.read_text().await?;
            if reply != prompt::FILE_TRANSFER {
                return Err(Error::protocol(format!(
                    "unexpected server response after upload: {:?}",
                    truncate(&reply)
                )));
            }
        }
        debug!(name = %self.request.name, sent = self.bytes_sent, "upload finished");
        self.state = UploadState::Closed;
        Ok(())
    }

    /// Abort the session so the server cannot mistake a partial upload for
    /// a complete one
    pub(crate) async fn abort(&mut self) {
        self.stream.sabotage().await;
        self.state = UploadState::Closed;
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(50) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Writer for an accepted upload
pub struct UploadWriter<'u, 'a> {
    upload: &'u mut Upload<'a>,
    text: bool,
}

impl UploadWriter<'_, '_> {
    /// Send bytes; in text mode `\r\n` becomes `\n`
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.text {
            let normalized = normalize_crlf(&mut self.upload.pending_cr, data);
            self.upload.send_data(&normalized).await
        } else {
            self.upload.send_data(data).await
        }
    }

    /// Send text
    pub async fn write_str(&mut self, text: &str) -> Result<()> {
        self.write(text.as_bytes()).await
    }

    /// Copy `reader` to the server until it is exhausted or the server
    /// cancels. Returns the number of bytes read.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        while !self.upload.is_cancelled() {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            self.write(&buf[..n]).await?;
        }
        Ok(total)
    }

    /// Whether the server has stopped the upload
    pub fn is_cancelled(&self) -> bool {
        self.upload.is_cancelled()
    }
}

/// Replace `\r\n` with `\n`.
///
/// A trailing `\r` is held back in `pending_cr` until the next call shows
/// whether a `\n` follows it.
pub fn normalize_crlf(pending_cr: &mut bool, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1);
    if data.is_empty() {
        return out;
    }
    if std::mem::take(pending_cr) && data[0] != b'\n' {
        out.push(b'\r');
    }
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\r' if i + 1 == data.len() => *pending_cr = true,
            b'\r' if data[i + 1] == b'\n' => {}
            b => out.push(b),
        }
        i += 1;
    }
    out
}
