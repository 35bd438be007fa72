//! Frame struct with typed accessors.
//!
//! Represents one `(header, body)` unit on the wire.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{Frame, Header};
//! use bytes::Bytes;
//!
//! let header = Header::object(1, 42, 5);
//! let frame = Frame::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.command(), 1);
//! assert_eq!(frame.body(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Create an object frame, deriving `body_length` from the body.
    pub fn object(command: u32, tag: u32, body: Bytes) -> Self {
        Self {
            header: Header::object(command, tag, body.len() as u32),
            body,
        }
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn command(&self) -> u32 {
        self.header.command
    }

    #[inline]
    pub fn tag(&self) -> u32 {
        self.header.tag
    }

    #[inline]
    pub fn message_type(&self) -> u16 {
        self.header.message_type
    }

    /// Total encoded size (header + body).
    #[inline]
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Encode the frame into a single contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_frame(&self.header, &self.body)
    }
}

/// Build a complete frame as a single byte vector.
///
/// Use the writer task for scatter/gather output; this is for tests and
/// callers that need one buffer.
///
/// ```
/// use wirelink::protocol::{build_frame, Header, HEADER_SIZE};
///
/// let bytes = build_frame(&Header::object(1, 42, 5), b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}
