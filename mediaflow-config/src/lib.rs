//! Configuration management for mediaflow binaries
//!
//! Values come from the process environment (and an optional `.env` file),
//! using the `MEDIAFLOW_` prefix, e.g. `MEDIAFLOW_RECEIVE_MTU=1500`.

use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MEDIAFLOW";

pub use rtp_endpoints::DEFAULT_RECEIVE_MTU;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Endpoint and demo configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Buffer size handed to `read_rtcp`
    pub receive_mtu: usize,
    /// Per-stream packet queue depth of the loopback transport
    pub loopback_queue_depth: usize,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
    /// `console` or `json`
    pub log_format: String,
    /// Packets pushed by the loopback demo
    pub demo_packet_count: u32,
    /// SSRC used by the loopback demo
    pub demo_ssrc: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            receive_mtu: DEFAULT_RECEIVE_MTU,
            loopback_queue_depth: 256,
            log_level: "info".to_string(),
            log_format: "console".to_string(),
            demo_packet_count: 10,
            demo_ssrc: 12345,
        }
    }
}

impl EndpointConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();
        Self::load(None)
    }

    /// Load configuration from an explicit variable map instead of the process environment
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(Some(vars))
    }

    fn load(source: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let defaults = EndpointConfig::default();

        let config: EndpointConfig = Config::builder()
            .set_default("receive_mtu", defaults.receive_mtu as i64)?
            .set_default("loopback_queue_depth", defaults.loopback_queue_depth as i64)?
            .set_default("log_level", defaults.log_level)?
            .set_default("log_format", defaults.log_format)?
            .set_default("demo_packet_count", defaults.demo_packet_count as i64)?
            .set_default("demo_ssrc", defaults.demo_ssrc as i64)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(source),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_mtu == 0 {
            return Err(ConfigError::Invalid {
                field: "receive_mtu",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.loopback_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "loopback_queue_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
