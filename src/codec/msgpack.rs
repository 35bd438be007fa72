//! MsgPack codec using `rmp-serde`.
//!
//! Structs are encoded with `to_vec_named` (struct-as-map) so that peers
//! written against other MessagePack libraries see field names, and so that
//! adding optional fields does not break older peers.
//!
//! # Example
//!
//! ```
//! use wirelink::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Ping {
//!     seq: u32,
//!     note: String,
//! }
//!
//! let msg = Ping { seq: 42, note: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Ping = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for frame bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value straight into a frame body.
    #[inline]
    pub fn encode_body<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Self::encode(value).map(Bytes::from)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WirelinkError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Position {
        x: i32,
        y: i32,
        label: String,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Position {
            x: -3,
            y: 7,
            label: "home".to_string(),
        };

        let body = MsgPackCodec::encode_body(&original).unwrap();
        let decoded: Position = MsgPackCodec::decode(&body).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let encoded = MsgPackCodec::encode(&Position {
            x: 0,
            y: 0,
            label: String::new(),
        })
        .unwrap();

        // fixmap with 3 entries, not fixarray (0x93)
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_str_body() {
        let encoded = MsgPackCodec::encode(&"ping").unwrap();
        let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, "ping");
    }

    #[test]
    fn test_binary_body() {
        let data: Vec<u8> = vec![0x00, 0xFF, 0x10];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();

        // bin8
        assert_eq!(encoded[0], 0xc4);

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data[..]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Position> = MsgPackCodec::decode(b"definitely not msgpack");
        assert!(matches!(result, Err(WirelinkError::Decode(_))));
    }

    #[test]
    fn test_decode_type_mismatch() {
        let encoded = MsgPackCodec::encode(&42u32).unwrap();
        let result: Result<String> = MsgPackCodec::decode(&encoded);
        assert!(result.is_err());
    }
}
