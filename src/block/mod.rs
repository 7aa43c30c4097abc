//! Block framing for MAPI messages
//!
//! A logical message travels as one or more blocks. The writer splits the
//! payload into blocks of at most [`MAX_BLOCK_PAYLOAD`] bytes and marks only
//! the final one; the reader concatenates block payloads until it sees the
//! final flag. A payload that is an exact multiple of the maximum (including
//! an empty payload) ends with an empty final block.

mod header;

pub use header::BlockHeader;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::buffer::WriteBuffer;
use crate::constants::{BLOCK_HEADER_SIZE, MAX_BLOCK_PAYLOAD, SABOTAGE_BODY, SABOTAGE_HEADER};
use crate::error::{Error, Result};
use crate::transport::{close_quietly, Transport};

/// One block read from the wire
#[derive(Debug, Clone)]
pub struct Block {
    /// Payload bytes
    pub payload: Bytes,
    /// Whether this block ends the message
    pub last: bool,
}

/// Encode `data` as blocks, marking the final block as last when `finish` is set.
pub fn encode_blocks(data: &[u8], finish: bool) -> Bytes {
    let blocks = data.len() / MAX_BLOCK_PAYLOAD + 1;
    let mut buf = WriteBuffer::with_capacity(data.len() + blocks * BLOCK_HEADER_SIZE);
    let mut pos = 0;
    loop {
        let end = (pos + MAX_BLOCK_PAYLOAD).min(data.len());
        let chunk = &data[pos..end];
        let final_chunk = chunk.len() < MAX_BLOCK_PAYLOAD;
        BlockHeader {
            length: chunk.len(),
            last: finish && final_chunk,
        }
        .write(&mut buf);
        buf.write_bytes(chunk);
        pos = end;
        if final_chunk {
            break;
        }
    }
    buf.freeze()
}

/// Framed MAPI stream over a [`Transport`]
pub struct BlockStream {
    transport: Box<dyn Transport>,
}

impl BlockStream {
    /// Wrap a connected transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Check if the underlying transport is still open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send bytes without framing (login priming)
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send(data).await
    }

    /// Send a complete logical message
    pub async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        trace!(len = data.len(), "sending message");
        self.transport.send(&encode_blocks(data, true)).await
    }

    /// Send a complete text message
    pub async fn write_text(&mut self, text: &str) -> Result<()> {
        self.write_message(text.as_bytes()).await
    }

    /// Send `data` as blocks; without `finish` the message stays open.
    pub async fn write_blocks(&mut self, data: &[u8], finish: bool) -> Result<()> {
        trace!(len = data.len(), finish, "sending blocks");
        self.transport.send(&encode_blocks(data, finish)).await
    }

    /// Read one block.
    ///
    /// `at_message_start` selects how an end of stream before the header is
    /// reported: [`Error::ConnectionClosed`] between messages, a protocol
    /// error inside one.
    pub async fn read_block(&mut self, at_message_start: bool) -> Result<Block> {
        let mut raw = [0u8; BLOCK_HEADER_SIZE];
        self.fill(&mut raw, at_message_start).await?;
        let header = BlockHeader::parse(&raw)?;

        let mut payload = BytesMut::zeroed(header.length);
        self.fill(&mut payload, false).await?;
        trace!(len = header.length, last = header.last, "received block");

        Ok(Block {
            payload: payload.freeze(),
            last: header.last,
        })
    }

    /// Read blocks until the final one and return the joined payload
    pub async fn read_message(&mut self) -> Result<Bytes> {
        let first = self.read_block(true).await?;
        if first.last {
            return Ok(first.payload);
        }
        let mut message = BytesMut::from(&first.payload[..]);
        loop {
            let block = self.read_block(false).await?;
            message.extend_from_slice(&block.payload);
            if block.last {
                return Ok(message.freeze());
            }
        }
    }

    /// Read a message that must be UTF-8 text
    pub async fn read_text(&mut self) -> Result<String> {
        let message = self.read_message().await?;
        String::from_utf8(message.to_vec())
            .map_err(|e| Error::protocol(format!("server sent invalid UTF-8: {}", e)))
    }

    /// Send a deliberately invalid block so the server aborts whatever it is
    /// doing, then close the transport.
    pub async fn sabotage(&mut self) {
        let mut buf = WriteBuffer::with_capacity(BLOCK_HEADER_SIZE + SABOTAGE_BODY.len());
        buf.write_u16_le(SABOTAGE_HEADER);
        buf.write_bytes(SABOTAGE_BODY);
        let _ = self.transport.send(buf.as_slice()).await;
        close_quietly(self.transport.as_mut()).await;
    }

    /// Close the underlying transport
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    async fn fill(&mut self, buf: &mut [u8], eof_is_clean: bool) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.transport.receive(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(if eof_is_clean && filled == 0 {
                    Error::ConnectionClosed
                } else {
                    Error::protocol(format!(
                        "connection closed mid-block: expected {} more bytes",
                        buf.len() - filled
                    ))
                });
            }
            filled += n;
        }
        Ok(())
    }
}
