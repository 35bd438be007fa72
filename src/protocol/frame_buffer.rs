//! Frame buffer for accumulating partial reads.
//!
//! The transport delivers arbitrary-sized chunks; this buffer re-assembles
//! them into frames with a two-phase state machine:
//! - `WaitingForHeader`: need at least 14 bytes
//! - `WaitingForBody`: header parsed, need `body_length` more bytes
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{build_frame, FrameBuffer, Header};
//!
//! let bytes = build_frame(&Header::object(1, 0, 2), b"hi");
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[5..]).unwrap();
//! assert_eq!(frames[0].body(), b"hi");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{Result, WirelinkError};

/// Initial buffer capacity.
const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_body_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default body limit (16 MB).
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new frame buffer with a custom body limit.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForHeader,
            max_body_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push. Frames are returned in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// Returns `MalformedHeader` if a header announces a body larger than
    /// the configured maximum. The buffer should be discarded afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    if self.buffer.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let header = Header::decode(&self.buffer[..HEADER_SIZE])?;
                    if header.body_length > self.max_body_size {
                        return Err(WirelinkError::MalformedHeader(format!(
                            "Body size {} exceeds maximum {}",
                            header.body_length, self.max_body_size
                        )));
                    }

                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if header.body_length == 0 {
                        return Ok(Some(Frame::new(header, Bytes::new())));
                    }

                    self.state = State::WaitingForBody { header };
                }

                State::WaitingForBody { header } => {
                    let needed = header.body_length as usize;
                    if self.buffer.len() < needed {
                        return Ok(None);
                    }

                    let header = *header;
                    let body = self.buffer.split_to(needed).freeze();
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Frame::new(header, body)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
