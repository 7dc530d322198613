//! Scheduler configuration
//!
//! Bounds and timing for a [`Scheduler`](crate::scheduler::Scheduler). Every
//! field has a default matching the constants scripts were written against,
//! and may be overridden from a TOML file, the environment, or both.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `POSCTX_CHANNEL_PAYLOAD_MAX` | `100000` | Exclusive byte bound for channel and pub/sub payloads |
//! | `POSCTX_EXECUTION_PAYLOAD_MAX` | `100000` | Exclusive byte bound for commands and responses |
//! | `POSCTX_PUBSUB_SLOTS` | `10` | Number of subscriber slots |
//! | `POSCTX_LOCK_CEILING_MS` | `300000` | Safety ceiling for untimed lock waits |
//! | `POSCTX_WORKER_POLL_MS` | `50` | Idle sleep of a background worker between polls |
//!
//! Zero, negative or non-numeric values are warned about and ignored.
//!
//! ## File format
//!
//! ```toml
//! channel_payload_max = 65536
//! pubsub_slots = 4
//! ```

use posctx_core::{CHANNEL_PAYLOAD_MAX, EXECUTION_PAYLOAD_MAX, LOCK_CEILING, PUBSUB_SLOTS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_WORKER_POLL_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scheduler config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub channel_payload_max: usize,
    pub execution_payload_max: usize,
    pub pubsub_slots: usize,
    pub lock_ceiling_ms: u64,
    pub worker_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            channel_payload_max: CHANNEL_PAYLOAD_MAX,
            execution_payload_max: EXECUTION_PAYLOAD_MAX,
            pubsub_slots: PUBSUB_SLOTS,
            lock_ceiling_ms: LOCK_CEILING.as_millis() as u64,
            worker_poll_ms: DEFAULT_WORKER_POLL_MS,
        }
    }
}

impl SchedulerConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Read and parse a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Read a config file, then let the environment override it
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.with_env())
    }

    /// Apply `POSCTX_*` overrides on top of `self`
    pub fn with_env(self) -> Self {
        Self {
            channel_payload_max: env_override(
                "POSCTX_CHANNEL_PAYLOAD_MAX",
                self.channel_payload_max,
            ),
            execution_payload_max: env_override(
                "POSCTX_EXECUTION_PAYLOAD_MAX",
                self.execution_payload_max,
            ),
            pubsub_slots: env_override("POSCTX_PUBSUB_SLOTS", self.pubsub_slots),
            lock_ceiling_ms: env_override("POSCTX_LOCK_CEILING_MS", self.lock_ceiling_ms),
            worker_poll_ms: env_override("POSCTX_WORKER_POLL_MS", self.worker_poll_ms),
        }
    }

    pub fn lock_ceiling(&self) -> Duration {
        Duration::from_millis(self.lock_ceiling_ms)
    }

    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms)
    }
}

fn env_override<T>(name: &str, current: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    parse_positive(name, std::env::var(name).ok(), current)
}

/// Parse a strictly positive number, keeping `current` for missing, zero or
/// invalid values
fn parse_positive<T>(name: &str, value: Option<String>, current: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(value) = value else {
        return current;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => parsed,
        Ok(_) => {
            tracing::warn!("{name}={value} is invalid, using {current}");
            current
        }
        Err(_) => {
            tracing::warn!("{name}='{value}' is not a valid number, using {current}");
            current
        }
    }
}
