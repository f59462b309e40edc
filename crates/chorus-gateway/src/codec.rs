//! Frame codec
//!
//! Turns transport frames into [`GatewayMessage`]s and back. Three inbound shapes are
//! supported, selected once per connection:
//!
//! - plain JSON text frames
//! - per-payload zlib, where every binary frame is a complete zlib document
//! - zlib-stream, where one inflate context spans the whole connection and a logical
//!   message ends when the buffered bytes end in `00 00 FF FF`
//!
//! Any [`FrameError`] is fatal for the connection. Reconnecting creates a new codec.

use std::io::Read;

use chorus_common::Compression;
use flate2::read::ZlibDecoder;
use flate2::{Decompress, FlushDecompress, Status};

use crate::protocol::GatewayMessage;
use crate::transport::Frame;

/// Flush marker terminating every zlib-stream message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Upper bound for a single buffered or inflated message
pub const MAX_MESSAGE_SIZE: usize = 10_490_000;

/// Initial inflate buffer; grown as needed
const INFLATE_CHUNK: usize = 32 * 1024;

/// Frame decoding errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to inflate payload: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid gateway message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message exceeds {limit} bytes without a flush marker")]
    Truncated { limit: usize },

    #[error("connection closed with code {code}: {reason}")]
    UnexpectedClose { code: u16, reason: String },
}

/// Stateful decoder for one connection
pub struct FrameCodec {
    mode: Compression,
    inflate: Decompress,
    buffer: Vec<u8>,
}

impl FrameCodec {
    #[must_use]
    pub fn new(mode: Compression) -> Self {
        Self {
            mode,
            inflate: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    pub fn mode(&self) -> Compression {
        self.mode
    }

    /// Bytes waiting for a flush marker
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode one frame; `Ok(None)` means "need more data" or an empty payload
    pub fn decode(&mut self, frame: Frame) -> Result<Option<GatewayMessage>, FrameError> {
        match frame {
            Frame::Text(text) => parse(text.as_bytes()),
            Frame::Binary(bytes) => match self.mode {
                Compression::None => parse(&bytes),
                Compression::Payload => inflate_document(&bytes).and_then(|raw| parse(&raw)),
                Compression::Stream => self.push_stream(&bytes),
            },
            Frame::Close { code, reason } => Err(FrameError::UnexpectedClose { code, reason }),
        }
    }

    /// Encode an outbound message as a JSON text frame
    ///
    /// Outbound traffic is never compressed, so this needs no codec state.
    pub fn encode(message: &GatewayMessage) -> Result<Frame, FrameError> {
        Ok(Frame::Text(message.to_json()?))
    }

    fn push_stream(&mut self, bytes: &[u8]) -> Result<Option<GatewayMessage>, FrameError> {
        self.buffer.extend_from_slice(bytes);

        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            if self.buffer.len() > MAX_MESSAGE_SIZE {
                self.buffer.clear();
                return Err(FrameError::Truncated {
                    limit: MAX_MESSAGE_SIZE,
                });
            }
            return Ok(None);
        }

        let compressed = std::mem::take(&mut self.buffer);
        let raw = self.inflate_stream(&compressed)?;
        parse(&raw)
    }

    fn inflate_stream(&mut self, input: &[u8]) -> Result<Vec<u8>, FrameError> {
        let mut output = Vec::with_capacity(INFLATE_CHUNK.max(input.len() * 4));
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(INFLATE_CHUNK);
            }

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();

            let status = self
                .inflate
                .decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)
                .map_err(|e| FrameError::Decompress(e.into()))?;

            let consumed = usize::try_from(self.inflate.total_in() - before_in).unwrap_or(0);
            let produced = self.inflate.total_out() - before_out;
            offset += consumed;

            if output.len() > MAX_MESSAGE_SIZE {
                return Err(FrameError::Truncated {
                    limit: MAX_MESSAGE_SIZE,
                });
            }

            let input_done = offset >= input.len();
            let out_has_room = output.len() < output.capacity();

            match status {
                Status::StreamEnd => break,
                _ if input_done && out_has_room => break,
                _ if consumed == 0 && produced == 0 && out_has_room => {
                    return Err(FrameError::Decompress(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "inflate made no progress",
                    )));
                }
                _ => {}
            }
        }

        Ok(output)
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("mode", &self.mode)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

fn inflate_document(bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
    let limit = u64::try_from(MAX_MESSAGE_SIZE).unwrap_or(u64::MAX);
    let mut output = Vec::new();
    ZlibDecoder::new(bytes)
        .take(limit + 1)
        .read_to_end(&mut output)
        .map_err(FrameError::Decompress)?;

    if output.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::Truncated {
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(output)
}

fn parse(raw: &[u8]) -> Result<Option<GatewayMessage>, FrameError> {
    let text = std::str::from_utf8(raw)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(GatewayMessage::from_json(text)?))
}
