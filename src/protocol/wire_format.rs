//! Wire format encoding and decoding.
//!
//! Every frame starts with a 14-byte header:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────┐
//! │ Msg type │ Command  │ Tag      │ Body length │
//! │ 2 bytes  │ 4 bytes  │ 4 bytes  │ 4 bytes     │
//! │ uint16 BE│ uint32 BE│ uint32 BE│ uint32 BE   │
//! └──────────┴──────────┴──────────┴─────────────┘
//! ```
//!
//! The header is followed by exactly `body_length` opaque bytes.
//! All multi-byte integers are Big Endian.

use crate::error::{Result, WirelinkError};

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Default maximum body size (16 MB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Absolute maximum body size (~2 GB, max i32).
pub const ABSOLUTE_MAX_BODY_SIZE: u32 = 2_147_483_647;

/// Message type written on every frame produced by this crate.
pub const MESSAGE_TYPE_OBJECT: u16 = 1;

/// First tag handed out by the response-tag allocator.
///
/// Application tags for fire-and-forget sends must stay below this value.
pub const TAG_SEED: u32 = 1_000_000;

/// Tag value that must never appear on the wire.
pub const RESERVED_TAG: u32 = u32::MAX;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type discriminator.
    pub message_type: u16,
    /// Application command.
    pub command: u32,
    /// Correlation tag.
    pub tag: u32,
    /// Body length in bytes.
    pub body_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(message_type: u16, command: u32, tag: u32, body_length: u32) -> Self {
        Self {
            message_type,
            command,
            tag,
            body_length,
        }
    }

    /// Create an object header (the only type this crate writes).
    pub fn object(command: u32, tag: u32, body_length: u32) -> Self {
        Self::new(MESSAGE_TYPE_OBJECT, command, tag, body_length)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use wirelink::protocol::Header;
    ///
    /// let header = Header::object(7, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 14);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (14 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.message_type.to_be_bytes());
        buf[2..6].copy_from_slice(&self.command.to_be_bytes());
        buf[6..10].copy_from_slice(&self.tag.to_be_bytes());
        buf[10..14].copy_from_slice(&self.body_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Fails with `MalformedHeader` if fewer than 14 bytes are supplied.
    ///
    /// # Example
    ///
    /// ```
    /// use wirelink::protocol::Header;
    ///
    /// let bytes = [0, 1, 0, 0, 0, 7, 0, 0, 0, 42, 0, 0, 0, 100];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.command, 7);
    /// assert_eq!(header.tag, 42);
    /// assert_eq!(header.body_length, 100);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(WirelinkError::MalformedHeader(format!(
                "need {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        Ok(Self {
            message_type: u16::from_be_bytes([buf[0], buf[1]]),
            command: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            tag: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
            body_length: u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Tag is not the reserved value
    /// - Body length doesn't exceed max
    pub fn validate(&self, max_body_size: u32) -> Result<()> {
        if self.tag == RESERVED_TAG {
            return Err(WirelinkError::ReservedTag(self.tag));
        }

        if self.body_length > max_body_size {
            return Err(WirelinkError::MalformedHeader(format!(
                "Body size {} exceeds maximum {}",
                self.body_length, max_body_size
            )));
        }

        Ok(())
    }

    /// Check if the tag lies in the auto-allocated response range.
    #[inline]
    pub fn has_allocated_tag(&self) -> bool {
        is_allocated_tag(self.tag)
    }
}

/// Check whether `tag` belongs to the auto-allocated range (or is reserved).
#[inline]
pub fn is_allocated_tag(tag: u32) -> bool {
    tag >= TAG_SEED
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::object(1, 42, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_extreme_values_roundtrip() {
        for header in [
            Header::new(0, 0, 0, 0),
            Header::new(u16::MAX, u32::MAX, u32::MAX, u32::MAX),
            Header::new(0x8000, 0x8000_0000, TAG_SEED, 1),
        ] {
            assert_eq!(Header::decode(&header.encode()).unwrap(), header);
        }
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(0x0102, 0x03040506, 0x0708090A, 0x0B0C0D0E);
        let bytes = header.encode();

        assert_eq!(
            bytes,
            [
                0x01, 0x02, // message type
                0x03, 0x04, 0x05, 0x06, // command
                0x07, 0x08, 0x09, 0x0A, // tag
                0x0B, 0x0C, 0x0D, 0x0E, // body length
            ]
        );
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        let err = Header::decode(&buf).unwrap_err();
        assert!(matches!(err, WirelinkError::MalformedHeader(_)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = Header::object(3, 4, 5).encode().to_vec();
        bytes.extend_from_slice(b"trailing");
        assert_eq!(Header::decode(&bytes).unwrap(), Header::object(3, 4, 5));
    }

    #[test]
    fn test_validate_reserved_tag_rejected() {
        let header = Header::object(1, RESERVED_TAG, 0);
        let result = header.validate(DEFAULT_MAX_BODY_SIZE);
        assert!(matches!(result, Err(WirelinkError::ReservedTag(t)) if t == u32::MAX));
    }

    #[test]
    fn test_validate_body_too_large() {
        let header = Header::object(1, 1, 1_000_000);
        let result = header.validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_allocated_tag_range() {
        assert!(!is_allocated_tag(0));
        assert!(!is_allocated_tag(TAG_SEED - 1));
        assert!(is_allocated_tag(TAG_SEED));
        assert!(Header::object(1, RESERVED_TAG, 0).has_allocated_tag());
    }

    #[test]
    fn test_standalone_functions() {
        let header = Header::object(9, 1, 0);
        let encoded = encode_header(&header);
        assert_eq!(decode_header(&encoded).unwrap(), header);
    }
}
