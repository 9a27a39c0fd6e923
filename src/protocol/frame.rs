//! Frame accumulation for partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management and a state machine for
//! handling fragmented frames:
//! - `AwaitingHeader`: need at least 82 bytes
//! - `AwaitingBody`: header parsed, need `body_len` more bytes
//!
//! A short read never advances the state: an undersized chunk is not
//! mistaken for a full header, and a partially received body keeps the
//! reader waiting with an explicit bytes-still-needed count.

use bytes::{Bytes, BytesMut};

use super::header::{Header, HEADER_SIZE};
use super::{marker_matches, MARKER_SIZE};
use crate::error::{Result, WirecallError};

/// Default maximum body length (64 MiB).
pub const DEFAULT_MAX_BODY_LEN: u32 = 64 * 1024 * 1024;

/// One complete frame: a parsed header plus its body bytes.
///
/// The body carries the codec marker followed by the envelope, exactly
/// `header.body_len` bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Parsed frame header.
    pub header: Header,
    /// Codec marker + envelope bytes.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Check whether the body starts with the supported codec marker.
    pub fn marker_ok(&self) -> bool {
        marker_matches(&self.body)
    }

    /// The codec marker bytes, possibly short when the body is undersized.
    pub fn marker(&self) -> &[u8] {
        let end = self.body.len().min(MARKER_SIZE);
        &self.body[..end]
    }

    /// The envelope bytes after the codec marker, empty when the body is
    /// too short to hold a marker.
    pub fn envelope(&self) -> &[u8] {
        if self.body.len() < MARKER_SIZE {
            &[]
        } else {
            &self.body[MARKER_SIZE..]
        }
    }
}

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 82 bytes).
    AwaitingHeader,
    /// Header parsed, waiting for body bytes.
    AwaitingBody { header: Header, remaining: u32 },
}

/// Accumulates incoming bytes and extracts complete frames.
///
/// Bytes past the current frame stay buffered for the next extraction, so
/// back-to-back requests on a persistent connection are never lost.
pub struct FrameReader {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed body length.
    max_body_len: u32,
}

impl FrameReader {
    /// Create a new frame reader with the default body length cap.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_LEN)
    }

    /// Create a new frame reader with a custom body length cap.
    pub fn with_max_body(max_body_len: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::AwaitingHeader,
            max_body_len,
        }
    }

    /// Append raw bytes from a socket read.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract a single complete frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a bad magic or an oversized body length
    pub fn poll_frame(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::AwaitingHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = Header::parse(&self.buffer[..HEADER_SIZE])?;

                if header.body_len > self.max_body_len {
                    return Err(WirecallError::Protocol(format!(
                        "body length {} exceeds maximum {}",
                        header.body_len, self.max_body_len
                    )));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.body_len == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::AwaitingBody {
                    header,
                    remaining: header.body_len,
                };

                self.poll_frame()
            }

            State::AwaitingBody { header, remaining } => {
                let remaining = *remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                let header = *header;

                self.state = State::AwaitingHeader;

                Ok(Some(Frame::new(header, body)))
            }
        }
    }

    /// Bytes still required before the current phase can complete.
    pub fn bytes_needed(&self) -> usize {
        match &self.state {
            State::AwaitingHeader => HEADER_SIZE.saturating_sub(self.buffer.len()),
            State::AwaitingBody { remaining, .. } => {
                (*remaining as usize).saturating_sub(self.buffer.len())
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::AwaitingHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingHeader => "AwaitingHeader",
            State::AwaitingBody { .. } => "AwaitingBody",
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
