//! Packet header model.
//!
//! The header is always encoded with the MsgPack codec (named fields) so it
//! can be parsed before the payload codec is known. On the wire it is
//! preceded by its byte length as a big-endian `u16`.

use serde::{Deserialize, Serialize};

use crate::codec::{EncodingType, HEADER_ENCODING};
use crate::error::{Result, RoutewireError};

/// Size of the header length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Correlation id meaning "no correlation" (notify and push packets).
pub const NO_ID: u32 = 0;

/// Discriminates what a packet is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PackageType {
    /// Client call expecting a response with the same id.
    Request = 1,
    /// Reply to a request.
    Response = 2,
    /// One-way client message.
    Notify = 3,
    /// Server-initiated event.
    Push = 4,
}

impl PackageType {
    /// True for package types that carry a correlation id.
    #[inline]
    pub fn is_correlated(self) -> bool {
        matches!(self, PackageType::Request | PackageType::Response)
    }
}

impl TryFrom<u8> for PackageType {
    type Error = RoutewireError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PackageType::Request),
            2 => Ok(PackageType::Response),
            3 => Ok(PackageType::Notify),
            4 => Ok(PackageType::Push),
            other => Err(RoutewireError::FramingCorrupt(format!(
                "unknown package type {}",
                other
            ))),
        }
    }
}

impl From<PackageType> for u8 {
    fn from(value: PackageType) -> u8 {
        value as u8
    }
}

/// Outcome code carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum StatusCode {
    #[default]
    Success = 0,
    Error = 1,
}

impl TryFrom<u8> for StatusCode {
    type Error = RoutewireError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(StatusCode::Success),
            1 => Ok(StatusCode::Error),
            other => Err(RoutewireError::FramingCorrupt(format!(
                "unknown status code {}",
                other
            ))),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(value: StatusCode) -> u8 {
        value as u8
    }
}

/// Application-level status of a response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

impl Status {
    /// Successful status with an empty message.
    pub fn success() -> Self {
        Self::default()
    }

    /// Error status with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

/// Metadata for one packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Logical endpoint or event channel.
    pub route: u32,
    /// Payload codec tag (see [`EncodingType`]). Kept raw so unknown tags
    /// still frame and only fail when the payload is decoded.
    pub encoding_type: u8,
    /// Request, response, notify or push.
    pub package_type: PackageType,
    /// Payload length in bytes.
    pub content_size: u32,
    /// Correlation id ([`NO_ID`] for notify and push).
    pub id: u32,
    /// Present on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl Header {
    /// Create a header with an empty payload and no status.
    pub fn new(route: u32, encoding: EncodingType, package_type: PackageType, id: u32) -> Self {
        Self {
            route,
            encoding_type: encoding.tag(),
            package_type,
            content_size: 0,
            id,
            status: None,
        }
    }

    /// Attach a response status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Resolve the payload codec named by this header.
    #[inline]
    pub fn encoding(&self) -> Result<EncodingType> {
        EncodingType::try_from(self.encoding_type)
    }

    /// Response status, treating a missing status as success.
    pub fn status(&self) -> Status {
        self.status.clone().unwrap_or_default()
    }

    /// Encode with the fixed header codec.
    pub fn encode(&self) -> Result<Vec<u8>> {
        HEADER_ENCODING.encode(self)
    }

    /// Decode with the fixed header codec.
    ///
    /// Any failure is reported as `FramingCorrupt`: once a header cannot be
    /// read the byte stream can no longer be trusted.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        HEADER_ENCODING
            .decode(bytes)
            .map_err(|e| RoutewireError::FramingCorrupt(format!("malformed header: {}", e)))
    }

    /// Check size limits before any payload bytes are awaited.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.content_size > max_payload_size {
            return Err(RoutewireError::FramingCorrupt(format!(
                "Payload size {} exceeds maximum {}",
                self.content_size, max_payload_size
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.package_type == PackageType::Request
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.package_type == PackageType::Response
    }

    #[inline]
    pub fn is_notify(&self) -> bool {
        self.package_type == PackageType::Notify
    }

    #[inline]
    pub fn is_push(&self) -> bool {
        self.package_type == PackageType::Push
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let mut original = Header::new(7, EncodingType::MsgPack, PackageType::Request, 42);
        original.content_size = 100;

        let encoded = original.encode().unwrap();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_status_survives_roundtrip() {
        let original = Header::new(7, EncodingType::Json, PackageType::Response, 3)
            .with_status(Status::error("SYSTEM_ERR"));

        let decoded = Header::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded.status(), Status::error("SYSTEM_ERR"));
        assert!(!decoded.status().is_success());
    }

    #[test]
    fn test_missing_status_is_success() {
        let header = Header::new(1, EncodingType::Raw, PackageType::Response, 1);
        assert!(header.status.is_none());
        assert!(header.status().is_success());
        assert!(header.status().message.is_empty());
    }

    #[test]
    fn test_decode_garbage_is_corrupt() {
        let err = Header::decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, RoutewireError::FramingCorrupt(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_package_type_is_corrupt() {
        #[derive(Serialize)]
        struct Forged {
            route: u32,
            encoding_type: u8,
            package_type: u8,
            content_size: u32,
            id: u32,
        }

        let bytes = rmp_serde::to_vec_named(&Forged {
            route: 1,
            encoding_type: 1,
            package_type: 9,
            content_size: 0,
            id: 0,
        })
        .unwrap();

        let err = Header::decode(&bytes).unwrap_err();
        assert!(matches!(err, RoutewireError::FramingCorrupt(_)));
    }

    #[test]
    fn test_unknown_encoding_survives_framing() {
        let mut header = Header::new(1, EncodingType::Raw, PackageType::Push, NO_ID);
        header.encoding_type = 77;

        let decoded = Header::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded.encoding_type, 77);
        assert!(matches!(
            decoded.encoding(),
            Err(RoutewireError::UnsupportedEncoding(77))
        ));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let mut header = Header::new(1, EncodingType::Raw, PackageType::Notify, NO_ID);
        header.content_size = 1_000_000;

        let result = header.validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
    }

    #[test]
    fn test_package_type_accessors() {
        let request = Header::new(1, EncodingType::Raw, PackageType::Request, 5);
        assert!(request.is_request());
        assert!(request.package_type.is_correlated());

        let push = Header::new(1, EncodingType::Raw, PackageType::Push, NO_ID);
        assert!(push.is_push());
        assert!(!push.package_type.is_correlated());
        assert!(!PackageType::Notify.is_correlated());
        assert!(PackageType::Response.is_correlated());
    }

    #[test]
    fn test_package_type_wire_values() {
        for ty in [
            PackageType::Request,
            PackageType::Response,
            PackageType::Notify,
            PackageType::Push,
        ] {
            assert_eq!(PackageType::try_from(u8::from(ty)).unwrap(), ty);
        }
        assert!(PackageType::try_from(0).is_err());
    }
}
