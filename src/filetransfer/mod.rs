//! File transfers requested by the server
//!
//! `COPY INTO ... ON CLIENT` makes the server ask the client to read
//! (upload) or write (download) a file on its behalf. The request arrives
//! inside a response, after the `\x01\x03\n` prompt, as one command line:
//!
//! | Command         | Meaning                                           |
//! |-----------------|---------------------------------------------------|
//! | `r OFFSET NAME` | upload text, skipping `OFFSET - 1` lines          |
//! | `rb NAME`       | upload binary                                     |
//! | `w NAME`        | download text                                     |
//! | `wb NAME`       | download binary                                   |
//!
//! The request is handed to the registered [`TransferHandler`], which either
//! refuses it or asks for a writer/reader and streams the data. Every request
//! ends with exactly one status sent back: a refusal line, the end of the
//! uploaded data, or the acknowledgement that starts a download.

mod directory;
mod download;
mod upload;

pub use directory::SafeDirectoryHandler;
pub use download::{Download, DownloadReader};
pub use upload::{normalize_crlf, Upload, UploadWriter};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::block::BlockStream;
use crate::constants::transfer_message::{
    INVALID_COMMAND, NO_DOWNLOAD_HANDLER, NO_RESPONSE, NO_UPLOAD_HANDLER,
};
use crate::error::{Error, Result};

/// Direction of a transfer, seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Client sends file contents to the server
    Upload,
    /// Server sends data for the client to store
    Download,
}

/// A parsed file transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Upload or download
    pub direction: TransferDirection,
    /// File name as written in the SQL statement
    pub name: String,
    /// Text mode (line oriented UTF-8) or binary
    pub text: bool,
    /// Lines to skip before uploading; always 0 for binary and downloads
    pub skip_amount: u64,
}

impl TransferRequest {
    /// Parse the command line following the file transfer prompt
    pub fn parse(command: &str) -> Result<Self> {
        let command = command.strip_suffix('\n').unwrap_or(command);
        let invalid = || Error::Transfer(format!("{}: {:?}", INVALID_COMMAND, command));

        let (verb, rest) = command.split_once(' ').ok_or_else(invalid)?;
        let (direction, text, skip_amount, name) = match verb {
            "r" => {
                let (offset, name) = rest.split_once(' ').ok_or_else(invalid)?;
                let offset: u64 = offset.parse().map_err(|_| invalid())?;
                // the server counts lines from 1
                (TransferDirection::Upload, true, offset.saturating_sub(1), name)
            }
            "rb" => (TransferDirection::Upload, false, 0, rest),
            "w" => (TransferDirection::Download, true, 0, rest),
            "wb" => (TransferDirection::Download, false, 0, rest),
            _ => return Err(invalid()),
        };
        if name.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            direction,
            name: name.to_string(),
            text,
            skip_amount,
        })
    }
}

/// Application hook for file transfers.
///
/// Both operations default to refusing the request, so a handler only
/// implements the direction it supports.
///
/// # Security
///
/// The file name comes from the server. A handler that opens files must
/// validate it; otherwise a hostile server can read or overwrite arbitrary
/// files. [`SafeDirectoryHandler`] confines transfers to one directory.
#[async_trait]
pub trait TransferHandler: Send + Sync {
    /// Called for an upload request. Either call [`Upload::refuse`] or
    /// obtain a writer and write the data.
    async fn handle_upload(&self, upload: &mut Upload<'_>) -> Result<()> {
        upload.refuse(NO_UPLOAD_HANDLER).await
    }

    /// Called for a download request. Either call [`Download::refuse`] or
    /// obtain a reader and consume the data.
    async fn handle_download(&self, download: &mut Download<'_>) -> Result<()> {
        download.refuse(NO_DOWNLOAD_HANDLER).await
    }

    /// Called once when the server stops an upload early.
    fn cancel(&self) {}
}

/// Handler that refuses every transfer
#[derive(Debug, Clone, Copy, Default)]
pub struct RefuseTransfers;

impl TransferHandler for RefuseTransfers {}

/// How a transfer ended
#[derive(Debug)]
pub enum TransferOutcome {
    /// Data transferred or the request refused; the response continues
    Completed,
    /// The transfer failed but the session is intact; the rest of the
    /// response must be read before reporting the error
    Failed(Error),
    /// The session was aborted and is no longer usable
    Sabotaged(Error),
}

fn transfer_error(err: Error) -> Error {
    match err {
        Error::Transfer(_) => err,
        e if e.is_fatal() => e,
        e => Error::Transfer(e.to_string()),
    }
}

/// Text sent to the server when refusing because of `err`
fn refusal_text(err: &Error) -> String {
    match err {
        Error::Transfer(message) => message.clone(),
        e => e.to_string(),
    }
}

fn with_newline(message: &str) -> String {
    if message.ends_with('\n') {
        message.to_string()
    } else {
        format!("{}\n", message)
    }
}

/// Serve one transfer request read from the stream
pub(crate) async fn handle_transfer(
    stream: &mut BlockStream,
    handler: Option<&dyn TransferHandler>,
    command: &str,
) -> TransferOutcome {
    let request = match TransferRequest::parse(command) {
        Ok(request) => request,
        Err(e) => {
            warn!(command, "invalid file transfer command");
            return match stream.write_text(&with_newline(&refusal_text(&e))).await {
                Ok(()) => TransferOutcome::Failed(e),
                Err(io) => TransferOutcome::Failed(io),
            };
        }
    };
    debug!(name = %request.name, direction = ?request.direction, text = request.text, "file transfer requested");

    let Some(handler) = handler else {
        let message = match request.direction {
            TransferDirection::Upload => NO_UPLOAD_HANDLER,
            TransferDirection::Download => NO_DOWNLOAD_HANDLER,
        };
        return match stream.write_text(&with_newline(message)).await {
            Ok(()) => TransferOutcome::Completed,
            Err(e) => TransferOutcome::Failed(e),
        };
    };

    match request.direction {
        TransferDirection::Upload => run_upload(Upload::new(stream, handler, request)).await,
        TransferDirection::Download => run_download(handler, Download::new(stream, request)).await,
    }
}

async fn run_upload(mut upload: Upload<'_>) -> TransferOutcome {
    let handler = upload.handler();
    match handler.handle_upload(&mut upload).await {
        Ok(()) if upload.is_pending() => match upload.refuse(NO_RESPONSE).await {
            Ok(()) => TransferOutcome::Failed(Error::Transfer(NO_RESPONSE.to_string())),
            Err(e) => TransferOutcome::Failed(e),
        },
        Ok(()) => match upload.close().await {
            Ok(()) => TransferOutcome::Completed,
            Err(e) if e.is_fatal() => TransferOutcome::Failed(e),
            Err(e) => {
                upload.abort().await;
                TransferOutcome::Sabotaged(e)
            }
        },
        Err(e) => {
            let e = transfer_error(e);
            if upload.is_pending() {
                return match upload.refuse(&refusal_text(&e)).await {
                    Ok(()) => TransferOutcome::Failed(e),
                    Err(send) => TransferOutcome::Failed(send),
                };
            }
            if upload.is_streaming() {
                // there is no way to report an error once data is flowing
                warn!(error = %e, "upload failed after data was sent, aborting session");
                upload.abort().await;
                return TransferOutcome::Sabotaged(e);
            }
            TransferOutcome::Failed(e)
        }
    }
}

async fn run_download(handler: &dyn TransferHandler, mut download: Download<'_>) -> TransferOutcome {
    match handler.handle_download(&mut download).await {
        Ok(()) if download.is_pending() => match download.refuse(NO_RESPONSE).await {
            Ok(()) => TransferOutcome::Failed(Error::Transfer(NO_RESPONSE.to_string())),
            Err(e) => TransferOutcome::Failed(e),
        },
        Ok(()) => match download.close().await {
            Ok(()) => TransferOutcome::Completed,
            Err(e) => TransferOutcome::Failed(e),
        },
        Err(e) => {
            let e = transfer_error(e);
            if download.is_pending() {
                return match download.refuse(&refusal_text(&e)).await {
                    Ok(()) => TransferOutcome::Failed(e),
                    Err(send) => TransferOutcome::Failed(send),
                };
            }
            if download.is_streaming() {
                warn!(error = %e, "download failed while data was arriving, aborting session");
                download.abort().await;
                return TransferOutcome::Sabotaged(e);
            }
            TransferOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_upload() {
        let req = TransferRequest::parse("r 6 /tmp/data.csv\n").unwrap();
        assert_eq!(req.direction, TransferDirection::Upload);
        assert!(req.text);
        assert_eq!(req.skip_amount, 5);
        assert_eq!(req.name, "/tmp/data.csv");

        assert_eq!(TransferRequest::parse("r 0 a").unwrap().skip_amount, 0);
        assert_eq!(TransferRequest::parse("r 1 a").unwrap().skip_amount, 0);
    }

    #[test]
    fn test_parse_names_with_spaces() {
        let req = TransferRequest::parse("rb my file.bin\n").unwrap();
        assert!(!req.text);
        assert_eq!(req.name, "my file.bin");
        assert_eq!(TransferRequest::parse("r 1 a b").unwrap().name, "a b");
    }

    #[test]
    fn test_parse_downloads() {
        let text = TransferRequest::parse("w out.csv\n").unwrap();
        assert_eq!(text.direction, TransferDirection::Download);
        assert!(text.text);
        let binary = TransferRequest::parse("wb out.bin\n").unwrap();
        assert!(!binary.text);
        assert_eq!(binary.skip_amount, 0);
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["x foo", "r foo", "r x name", "rb", "wb ", ""] {
            let err = TransferRequest::parse(bad).unwrap_err();
            assert!(
                err.to_string().contains(INVALID_COMMAND),
                "{:?} gave {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_with_newline() {
        assert_eq!(with_newline("no"), "no\n");
        assert_eq!(with_newline("yes\n"), "yes\n");
    }
}
