//! Codec module - serialization/deserialization for payloads.
//!
//! Payload codecs are selected per packet by the encoding tag carried in
//! the packet header:
//!
//! - [`RawCodec`] - bytes or UTF-8 text passed through verbatim
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (named fields); also the header codec
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! [`EncodingType`] is the registry: it maps a wire tag to the codec and
//! dispatches `encode`/`decode` with the target type as the shape.
//!
//! # Example
//!
//! ```
//! use routewire::codec::{self, EncodingType};
//!
//! let encoding = codec::get(1).unwrap();
//! assert_eq!(encoding, EncodingType::MsgPack);
//!
//! let encoded = encoding.encode(&"hello").unwrap();
//! let decoded: String = encoding.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod encoding;
mod json;
mod msgpack;
mod raw;

pub use encoding::{get, EncodingType, HEADER_ENCODING};
pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use raw::RawCodec;
