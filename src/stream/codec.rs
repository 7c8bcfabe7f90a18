//! NDJSON codec for agent stdout.
//!
//! Splits an arbitrarily chunked byte stream on `\n` and parses each complete
//! line as JSON. Unlike [`tokio_util::codec::LinesCodec`] this codec never
//! fails on content: invalid UTF-8 is replaced lossily, non-JSON lines become
//! [`Frame::Raw`], and lines longer than the configured maximum are discarded
//! and reported once as [`Frame::Oversized`].
//!
//! Framing happens on bytes before any decoding, so the frame sequence only
//! depends on the total byte content and never on where chunks were split.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_bridge::stream::NdjsonCodec;
//!
//! let frames = FramedRead::new(child_stdout, NdjsonCodec::new(MAX_LINE_BYTES));
//! ```

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Default maximum line length: 16 MiB.
///
/// Tool results echoed by the agent can carry whole files, so the cap is far
/// larger than a typical protocol line.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One decoded stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The line parsed as JSON.
    Json(Value),
    /// The line did not parse; kept for diagnostics only.
    Raw(String),
    /// The line exceeded the length cap; carries its length in bytes.
    Oversized(usize),
}

/// Line-framing decoder yielding [`Frame`]s.
#[derive(Debug)]
pub struct NdjsonCodec {
    max_line_bytes: usize,
    /// Offset up to which the buffer is known to contain no `\n`.
    next_index: usize,
    /// Bytes dropped so far from an oversize line still being discarded.
    discarding: Option<usize>,
}

impl NdjsonCodec {
    /// Create a codec that discards lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: None,
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_BYTES)
    }
}

impl Decoder for NdjsonCodec {
    type Item = Frame;
    type Error = AppError;

    /// Decode the next non-blank line from `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete line yet. Never returns
    /// an error.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (Some(dropped), Some(idx)) => {
                    src.advance(idx + 1);
                    self.next_index = 0;
                    self.discarding = None;
                    return Ok(Some(Frame::Oversized(dropped + idx)));
                }
                (Some(dropped), None) => {
                    let len = src.len();
                    src.advance(len);
                    self.next_index = 0;
                    self.discarding = Some(dropped + len);
                    return Ok(None);
                }
                (None, Some(idx)) if idx > self.max_line_bytes => {
                    src.advance(idx + 1);
                    self.next_index = 0;
                    return Ok(Some(Frame::Oversized(idx)));
                }
                (None, Some(idx)) => {
                    let line = src.split_to(idx + 1);
                    self.next_index = 0;
                    if let Some(frame) = parse_line(&line[..idx]) {
                        return Ok(Some(frame));
                    }
                    // Blank line: look for the next one.
                }
                (None, None) => {
                    let len = src.len();
                    if len > self.max_line_bytes {
                        src.advance(len);
                        self.next_index = 0;
                        self.discarding = Some(len);
                    } else {
                        self.next_index = len;
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Flush the final unterminated line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if let Some(dropped) = self.discarding.take() {
            src.clear();
            self.next_index = 0;
            return Ok(Some(Frame::Oversized(dropped)));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let line = src.split();
        self.next_index = 0;
        Ok(parse_line(&line))
    }
}

/// Synchronous push-style wrapper around [`NdjsonCodec`].
///
/// Feed chunks as they arrive and call [`FrameDecoder::finish`] once at end
/// of stream to flush the carry-over.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: NdjsonCodec,
    buffer: BytesMut,
    finished: bool,
}

impl FrameDecoder {
    /// Create a decoder with the given line cap.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            codec: NdjsonCodec::new(max_line_bytes),
            buffer: BytesMut::new(),
            finished: false,
        }
    }

    /// Append `chunk` and return every frame it completes.
    ///
    /// Chunks fed after [`FrameDecoder::finish`] are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.codec.decode(&mut self.buffer) {
            frames.push(frame);
        }
        frames
    }

    /// Flush the carry-over. Only the first call yields frames.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.codec.decode_eof(&mut self.buffer) {
            frames.push(frame);
        }
        frames
    }
}

/// Parse one line (without its `\n`); `None` for blank lines.
fn parse_line(bytes: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Frame::Json(value),
        Err(_) => Frame::Raw(trimmed.to_owned()),
    })
}
