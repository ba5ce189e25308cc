//! Client configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use routewire::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "request_timeout_ms": 2500 }"#).unwrap();
//! assert_eq!(config.request_timeout().as_millis(), 2500);
//! assert_eq!(config.id_modulus, 65_535);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{DEFAULT_ID_MODULUS, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Settings for one client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for `request` calls without an explicit timeout.
    pub request_timeout_ms: u64,
    /// Deadline for opening a TCP or Unix socket.
    pub connect_timeout_ms: u64,
    /// Largest correlation id before wrapping back to 1.
    pub id_modulus: u32,
    /// Requests allowed in flight. Defaults to, and is capped at, `id_modulus`.
    pub max_pending_requests: Option<usize>,
    /// Largest accepted payload; bigger inbound packets close the connection.
    pub max_payload_size: u32,
    pub writer: WriterSettings,
}

/// Outbound queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    pub max_pending_frames: usize,
    pub channel_capacity: usize,
    pub backpressure_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            id_modulus: DEFAULT_ID_MODULUS,
            max_pending_requests: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer: WriterSettings::default(),
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Effective id modulus (never 0).
    pub fn id_modulus(&self) -> u32 {
        self.id_modulus.max(1)
    }

    /// Pending-request limit after clamping to the id space.
    pub fn max_pending_requests(&self) -> usize {
        let modulus = self.id_modulus() as usize;
        self.max_pending_requests
            .unwrap_or(modulus)
            .clamp(1, modulus)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.writer.max_pending_frames,
            channel_capacity: self.writer.channel_capacity.max(1),
            backpressure_timeout: Duration::from_millis(self.writer.backpressure_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.id_modulus(), 65_535);
        assert_eq!(config.max_pending_requests(), 65_535);
        assert_eq!(config.max_payload_size, 16 * 1024 * 1024);
        assert_eq!(config.writer_config().max_pending_frames, 1024);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ClientConfig::from_json(
            r#"{
                "id_modulus": 255,
                "writer": { "channel_capacity": 16 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.id_modulus, 255);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.writer.channel_capacity, 16);
        assert_eq!(config.writer.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
    }

    #[test]
    fn test_from_json_empty_object() {
        assert_eq!(ClientConfig::from_json("{}").unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = ClientConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, crate::RoutewireError::Json(_)));
    }

    #[test]
    fn test_max_pending_clamped_to_modulus() {
        let config = ClientConfig {
            id_modulus: 100,
            max_pending_requests: Some(5_000),
            ..Default::default()
        };
        assert_eq!(config.max_pending_requests(), 100);

        let config = ClientConfig {
            max_pending_requests: Some(0),
            ..Default::default()
        };
        assert_eq!(config.max_pending_requests(), 1);
    }

    #[test]
    fn test_zero_modulus() {
        let config = ClientConfig {
            id_modulus: 0,
            ..Default::default()
        };
        assert_eq!(config.id_modulus(), 1);
        assert_eq!(config.max_pending_requests(), 1);
    }
}
