//! Raw codec - pass-through for binary and text payloads.
//!
//! The raw encoding carries a byte string verbatim. Any value that
//! serializes as bytes, a string, or a sequence of `u8` can be encoded;
//! decoding hands the bytes to the target type as a byte string, so
//! `serde_bytes::ByteBuf` and `String` (UTF-8 checked) are valid shapes.
//!
//! # Example
//!
//! ```
//! use routewire::codec::RawCodec;
//! use serde_bytes::ByteBuf;
//!
//! let encoded = RawCodec::encode(&ByteBuf::from(vec![1, 2, 3])).unwrap();
//! assert_eq!(encoded, vec![1, 2, 3]);
//!
//! let text: String = RawCodec::decode(b"plain text").unwrap();
//! assert_eq!(text, "plain text");
//! ```

use serde::de::value::{BytesDeserializer, Error as ValueError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_bytes::ByteBuf;

use crate::error::{Result, RoutewireError};

/// Raw codec that passes bytes through without transformation.
pub struct RawCodec;

impl RawCodec {
    /// Encode a byte-like value to its raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `RawEncode` if the value is not bytes, text, or a `u8` sequence.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        // Round-trip through MsgPack so any byte-like serde value lands in a ByteBuf.
        let packed = rmp_serde::to_vec(value)?;
        let buf: ByteBuf = rmp_serde::from_slice(&packed).map_err(|e| {
            RoutewireError::RawEncode(format!("value is not byte-like: {}", e))
        })?;
        Ok(buf.into_vec())
    }

    /// Decode raw bytes into a byte-string shaped value.
    ///
    /// # Errors
    ///
    /// Returns `RawDecode` if `T` cannot be built from a byte string.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let de = BytesDeserializer::<ValueError>::new(bytes);
        T::deserialize(de).map_err(|e| RoutewireError::RawDecode(e.to_string()))
    }
}
