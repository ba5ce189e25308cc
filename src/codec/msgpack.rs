//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written as maps (`to_vec_named`) so peers that
//! decode into dynamic objects see field names rather than positions.
//! The packet header uses this codec unconditionally.
//!
//! # Example
//!
//! ```
//! use routewire::codec::MsgPackCodec;
//! use std::collections::BTreeMap;
//!
//! let mut scores = BTreeMap::new();
//! scores.insert("alice".to_string(), 3u32);
//!
//! let bytes = MsgPackCodec::encode(&scores).unwrap();
//! let back: BTreeMap<String, u32> = MsgPackCodec::decode(&bytes).unwrap();
//! assert_eq!(back, scores);
//! ```

use crate::error::Result;

/// Structured-binary payload codec; also used for every header.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
