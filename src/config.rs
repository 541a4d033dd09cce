//! Configuration management for the station relay.
//!
//! Every parameter can be overridden through an environment variable with the
//! RELAY_ prefix; anything left unset keeps its default.
//!
//! # Environment Variables
//! - RELAY_MAX_RETRY: Attempts per message before giving up (default: 5)
//! - RELAY_ACK_DELAY_MS: Pause after an ack before the next send (default: 0)
//! - RELAY_NACK_DELAY_MS: Backoff base after a nack, multiplied by the attempt count (default: 200)
//! - RELAY_TIMEOUT_MS: Time to wait for an ack or nack (default: 1000)
//! - RELAY_CHUNK_SIZE: Stations per bulk bike-count update (default: 120)
//! - RELAY_NEAREST_COUNT: Stations sent in a nearest-stations batch (default: 10)
//! - RELAY_MODE: `planar` or `polar` (default: planar)
//! - RELAY_ORIGIN_LAT / RELAY_ORIGIN_LON: Grid origin in degrees (default: Budapest city center)
//! - RELAY_MAX_NAME_BYTES: Size of the watch's station name buffer (default: 32)
//! - RELAY_REFRESH_INTERVAL_MS: Period of automatic station list refreshes, 0 disables them (default: 0)

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::RelayError;
use crate::queue::DeliverySettings;

/// Prefix for all relay environment variables.
const ENV_PREFIX: &str = "RELAY_";

/// How relative positions are encoded for the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Positions and stations as x/y meters on a grid centered on the origin.
    /// The watch does its own distance sorting.
    Planar,
    /// Positions as distance/heading; stations ranked on the phone and only
    /// the nearest ones sent.
    Polar,
}

/// Configuration parameters for the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Attempts per message, including the first one.
    pub max_retry: u32,

    /// Delay after an ack before the next message is sent.
    pub ack_delay_ms: u64,

    /// Backoff base after a nack. The wait is `nack_delay_ms * attempts`.
    pub nack_delay_ms: u64,

    /// How long an attempt may stay in flight without an ack or nack.
    pub timeout_ms: u64,

    /// Number of stations per bulk update message.
    pub chunk_size: usize,

    /// Size of the nearest-stations batch in polar mode.
    pub nearest_count: usize,

    pub mode: RelayMode,

    /// Latitude of the grid origin, in degrees.
    pub origin_lat: f64,

    /// Longitude of the grid origin, in degrees.
    pub origin_lon: f64,

    /// Station name buffer on the watch, terminator included.
    pub max_name_bytes: usize,

    /// Period of automatic station list refreshes. 0 leaves refreshes to
    /// explicit requests.
    pub refresh_interval_ms: u64,
}

impl RelayConfig {
    /// Attempts to load configuration from environment variables.
    ///
    /// # Returns
    /// - Ok(config) if every variable present parses and the result validates
    /// - Err(RelayError::Config) otherwise
    pub fn from_env() -> Result<Self, RelayError> {
        // Load .env file if it exists for local development
        dotenv::dotenv().ok();

        let env_vars: std::collections::HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .map(|(k, v)| (k.trim_start_matches(ENV_PREFIX).to_string(), v))
            .collect();

        match envy::from_iter::<_, Self>(env_vars.into_iter()) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(RelayError::Config(format!(
                "Failed to parse environment variables: {}",
                e
            ))),
        }
    }

    /// Loads configuration from environment variables, falling back to defaults
    /// if they are invalid.
    pub fn from_env_or_default() -> Self {
        match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Validates all parameters.
    ///
    /// # Validation Rules
    /// - Retry count, timeout, chunk size and nearest count must be positive
    /// - The name buffer must hold at least 8 bytes
    /// - The origin must be a valid coordinate
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_retry == 0 {
            return Err(RelayError::Config("max_retry must be positive".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(RelayError::Config("timeout_ms must be positive".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(RelayError::Config("chunk_size must be positive".to_string()));
        }
        if self.nearest_count == 0 {
            return Err(RelayError::Config("nearest_count must be positive".to_string()));
        }
        if self.max_name_bytes < 8 {
            return Err(RelayError::Config("max_name_bytes must be at least 8".to_string()));
        }
        if !(-90.0..=90.0).contains(&self.origin_lat) || !(-180.0..=180.0).contains(&self.origin_lon) {
            return Err(RelayError::Config("origin is not a valid coordinate".to_string()));
        }
        Ok(())
    }

    /// Period of the refresh ticker, if one is configured.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    /// Queue timing derived from this configuration.
    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            max_retry: self.max_retry,
            ack_delay: Duration::from_millis(self.ack_delay_ms),
            nack_delay: Duration::from_millis(self.nack_delay_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            ack_delay_ms: 0,
            nack_delay_ms: 200,
            timeout_ms: 1000,
            chunk_size: 120,
            nearest_count: 10,
            mode: RelayMode::Planar,
            origin_lat: 47.4925,  // Budapest city center
            origin_lon: 19.0514,
            max_name_bytes: 32,
            refresh_interval_ms: 0,
        }
    }
}
