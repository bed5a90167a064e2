//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;

/// Environment variable holding the create-channel timeout in seconds.
pub const ENV_CONNECTION_TIMEOUT: &str = "EPICS_PVA_CONN_TMO";

/// Lowest channel priority.
pub const PRIORITY_MIN: i16 = 0;

/// Highest channel priority.
pub const PRIORITY_MAX: i16 = 99;

/// Settings shared by every channel of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Priority for channels created without an explicit one.
    pub default_priority: i16,
    /// Time allowed for a create-channel round trip; 0 disables the timer.
    pub create_channel_timeout_ms: u64,
    /// Policy applied after a failed search or create.
    pub search_retry: RetryPolicy,
    /// Minor revision assumed for fixed server addresses.
    pub protocol_minor_revision: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_priority: PRIORITY_MIN,
            create_channel_timeout_ms: 30_000,
            search_retry: RetryPolicy::unbounded(),
            protocol_minor_revision: 0,
        }
    }
}

impl ClientConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ClientConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| ClientError::Config {
                reason: e.to_string(),
            })?,
            "json" => serde_json::from_str(&contents).map_err(|e| ClientError::Config {
                reason: e.to_string(),
            })?,
            _ => {
                return Err(ClientError::Config {
                    reason: format!("unsupported config file extension: {ext}"),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Overlays settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_CONNECTION_TIMEOUT) {
            self.apply_timeout_seconds(&value)?;
        }
        Ok(())
    }

    fn apply_timeout_seconds(&mut self, value: &str) -> Result<()> {
        let secs: f64 = value.trim().parse().map_err(|_| ClientError::Config {
            reason: format!("{ENV_CONNECTION_TIMEOUT} is not a number: {value}"),
        })?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(ClientError::Config {
                reason: format!("{ENV_CONNECTION_TIMEOUT} must be non-negative: {value}"),
            });
        }
        self.create_channel_timeout_ms = (secs * 1000.0) as u64;
        Ok(())
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&self.default_priority) {
            return Err(ClientError::Config {
                reason: format!(
                    "default_priority {} outside {PRIORITY_MIN}..={PRIORITY_MAX}",
                    self.default_priority
                ),
            });
        }
        if self.search_retry.multiplier < 1.0 {
            return Err(ClientError::Config {
                reason: format!(
                    "search_retry.multiplier {} is below 1.0",
                    self.search_retry.multiplier
                ),
            });
        }
        Ok(())
    }

    /// Create-channel timeout, `None` when disabled.
    pub fn create_channel_timeout(&self) -> Option<Duration> {
        (self.create_channel_timeout_ms > 0)
            .then(|| Duration::from_millis(self.create_channel_timeout_ms))
    }
}
