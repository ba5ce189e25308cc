//! Error types for routewire.

use thiserror::Error;

/// Main error type for all routewire operations.
#[derive(Debug, Error)]
pub enum RoutewireError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (payload codec or config).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Value cannot be carried by the raw codec.
    #[error("Raw encode error: {0}")]
    RawEncode(String),

    /// Raw payload does not match the requested shape.
    #[error("Raw decode error: {0}")]
    RawDecode(String),

    /// The byte stream can no longer be trusted (bad header, oversize payload).
    #[error("Corrupt frame: {0}")]
    FramingCorrupt(String),

    /// Encoding tag not known to the codec registry.
    #[error("Unsupported encoding type: {0}")]
    UnsupportedEncoding(u8),

    /// A request with this id is already waiting for a reply.
    #[error("Request id {0} is already pending")]
    DuplicateId(u32),

    /// Too many requests in flight on this connection.
    #[error("Pending request table is full ({0} entries)")]
    PendingTableFull(usize),

    /// No reply arrived before the deadline.
    #[error("Request timed out")]
    Timeout,

    /// The connection went away before the request resolved.
    #[error("Disconnected")]
    Disconnected,

    /// The request was cancelled by its owner.
    #[error("Request cancelled")]
    Cancelled,

    /// Route name not present in the route table.
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl RoutewireError {
    /// True when a payload could not be turned into the requested shape.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            RoutewireError::MsgPackDecode(_)
                | RoutewireError::Json(_)
                | RoutewireError::RawDecode(_)
                | RoutewireError::UnsupportedEncoding(_)
        )
    }

    /// True when the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RoutewireError::FramingCorrupt(_) | RoutewireError::Io(_)
        )
    }
}

/// Result type alias using RoutewireError.
pub type Result<T> = std::result::Result<T, RoutewireError>;
