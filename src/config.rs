//! Session, dispatch, and console configuration

use crate::error::{DispatchError, Result};
use crate::transport::nats::NatsTransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lower bound of the default per-recipient send delay
pub const DEFAULT_MIN_DELAY_MS: u64 = 3987;
/// Upper bound of the default per-recipient send delay
pub const DEFAULT_MAX_DELAY_MS: u64 = 7658;
/// Finished jobs kept in memory before the oldest are evicted
pub const DEFAULT_MAX_FINISHED_JOBS: usize = 1000;
/// Fixed delay before reconnecting a dropped session
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Fixed backoff before a reconnect attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Reconnect automatically after a disconnect or auth failure
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            auto_reconnect: true,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Dispatch throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Minimum delay before a recipient's send fires
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay before a recipient's send fires (inclusive)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Publish a progress notification after every outcome
    #[serde(default = "default_true")]
    pub notify_progress: bool,

    /// Finished jobs retained for progress queries; 0 keeps every job
    #[serde(default = "default_max_finished_jobs")]
    pub max_finished_jobs: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            notify_progress: true,
            max_finished_jobs: DEFAULT_MAX_FINISHED_JOBS,
        }
    }
}

impl DispatchConfig {
    /// Check the delay range
    pub fn validate(&self) -> Result<()> {
        if self.max_delay_ms == 0 {
            return Err(DispatchError::Config(
                "maxDelayMs must be greater than zero".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(DispatchError::Config(format!(
                "minDelayMs ({}) exceeds maxDelayMs ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Top-level configuration for a host application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// NATS sidecar transport settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats: Option<NatsTransportConfig>,
}

impl ConsoleConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: ConsoleConfig = serde_json::from_str(&json).map_err(|e| {
            DispatchError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        if let Some(ref nats) = self.nats {
            nats.validate()?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_min_delay_ms() -> u64 {
    DEFAULT_MIN_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_max_finished_jobs() -> usize {
    DEFAULT_MAX_FINISHED_JOBS
}
