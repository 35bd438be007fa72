//! Network configuration.
//!
//! [`NetworkConfig`] carries the limits and timeouts shared by every
//! connection driven by one reactor. Values can be set programmatically or
//! loaded from JSON, where every field is optional and durations are given
//! in milliseconds:
//!
//! ```
//! use wirelink::NetworkConfig;
//!
//! let config = NetworkConfig::from_json_str(r#"{ "max_body_size": 4096, "connect_timeout_ms": 250 }"#).unwrap();
//! assert_eq!(config.max_body_size, 4096);
//! assert_eq!(config.connect_timeout, Some(std::time::Duration::from_millis(250)));
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WirelinkError};
use crate::protocol::{ABSOLUTE_MAX_BODY_SIZE, DEFAULT_MAX_BODY_SIZE};

/// Default timeout for resolving a discovery record.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default size of the per-connection socket read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Limits and timeouts applied to every connection of a reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Largest body a peer may announce before the connection is dropped.
    pub max_body_size: u32,
    /// Timeout for establishing a transport link (`None` = no timeout).
    pub connect_timeout: Option<Duration>,
    /// Timeout for resolving a named service (`None` = no timeout).
    pub resolve_timeout: Option<Duration>,
    /// Size of the buffer used for each socket read.
    pub read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            connect_timeout: None,
            resolve_timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// JSON shape of [`NetworkConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    max_body_size: Option<u32>,
    connect_timeout_ms: Option<u64>,
    resolve_timeout_ms: Option<u64>,
    read_buffer_size: Option<usize>,
}

impl NetworkConfig {
    /// Parse a configuration from JSON, filling omitted fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let defaults = Self::default();

        let config = Self {
            max_body_size: raw.max_body_size.unwrap_or(defaults.max_body_size),
            connect_timeout: raw
                .connect_timeout_ms
                .map(Duration::from_millis)
                .or(defaults.connect_timeout),
            resolve_timeout: raw
                .resolve_timeout_ms
                .map(Duration::from_millis)
                .or(defaults.resolve_timeout),
            read_buffer_size: raw.read_buffer_size.unwrap_or(defaults.read_buffer_size),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file (JSON).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values the protocol cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_body_size == 0 || self.max_body_size > ABSOLUTE_MAX_BODY_SIZE {
            return Err(WirelinkError::Config(format!(
                "max_body_size must be in 1..={}, got {}",
                ABSOLUTE_MAX_BODY_SIZE, self.max_body_size
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(WirelinkError::Config(
                "read_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }
}
