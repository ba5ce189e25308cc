//! Encoding tags and codec lookup.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{JsonCodec, MsgPackCodec, RawCodec};
use crate::error::{Result, RoutewireError};

/// Payload encoding carried in every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncodingType {
    /// Bytes or UTF-8 text passed through verbatim.
    Raw = 0,
    /// MessagePack with named struct fields.
    MsgPack = 1,
    /// JSON text.
    Json = 2,
}

/// Codec used for the packet header itself, regardless of the payload codec.
pub const HEADER_ENCODING: EncodingType = EncodingType::MsgPack;

impl EncodingType {
    /// Wire tag for this encoding.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encode a value with this codec.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            EncodingType::Raw => RawCodec::encode(value),
            EncodingType::MsgPack => MsgPackCodec::encode(value),
            EncodingType::Json => JsonCodec::encode(value),
        }
    }

    /// Decode bytes into the shape `T` with this codec.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            EncodingType::Raw => RawCodec::decode(bytes),
            EncodingType::MsgPack => MsgPackCodec::decode(bytes),
            EncodingType::Json => JsonCodec::decode(bytes),
        }
    }
}

impl TryFrom<u8> for EncodingType {
    type Error = RoutewireError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(EncodingType::Raw),
            1 => Ok(EncodingType::MsgPack),
            2 => Ok(EncodingType::Json),
            other => Err(RoutewireError::UnsupportedEncoding(other)),
        }
    }
}

impl From<EncodingType> for u8 {
    fn from(encoding: EncodingType) -> u8 {
        encoding.tag()
    }
}

/// Look up the codec for a wire tag.
///
/// Fails with [`RoutewireError::UnsupportedEncoding`] for unknown tags.
#[inline]
pub fn get(tag: u8) -> Result<EncodingType> {
    EncodingType::try_from(tag)
}
