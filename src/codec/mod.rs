//! Codec module - serialization of frame bodies.
//!
//! Bodies are opaque on the wire. [`MsgPackCodec`] turns application values
//! into bodies and back; connections also accept pre-encoded `Bytes`
//! (`send_raw`, `respond_raw`) when the application brings its own format.
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the choice is made at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;
