//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the combined fixed-header framing:
//! - 14-byte header encoding/decoding
//! - Frame buffer for re-assembling arbitrarily chunked reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_header, encode_header, is_allocated_tag, Header, ABSOLUTE_MAX_BODY_SIZE,
    DEFAULT_MAX_BODY_SIZE, HEADER_SIZE, MESSAGE_TYPE_OBJECT, RESERVED_TAG, TAG_SEED,
};
