//! # Engine Configuration
//!
//! Runtime knobs for the transition engine and the event dispatcher.
//!
//! Values are layered with the `config` crate, later layers winning:
//! 1. [`EngineConfig::default`]
//! 2. an optional file (`.toml`, `.json`, `.yaml`, inferred from the extension)
//! 3. environment variables prefixed `SCHEMATIC_ENGINE__`, for example
//!    `SCHEMATIC_ENGINE__MAX_FALLBACK_DEPTH=4`
//!
//! Retry *counts* belong to each schematic's `ConflictRetryPolicy`; this
//! module only decides how long to wait between attempts.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "SCHEMATIC_ENGINE";
const ENV_SEPARATOR: &str = "__";

/// Configuration-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration from {source_name}: {reason}")]
    LoadFailed { source_name: String, reason: String },

    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    fn load_failed(source_name: impl Into<String>, error: config::ConfigError) -> Self {
        Self::LoadFailed {
            source_name: source_name.into(),
            reason: error.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First backoff delay after a commit conflict
    pub conflict_backoff_base_ms: u64,
    /// Ceiling for the exponential conflict backoff
    pub conflict_backoff_max_ms: u64,
    /// Wall-clock limit for `send` calls under an unbounded retry policy
    pub unbounded_retry_timeout_ms: Option<u64>,
    /// How many failure fallbacks may nest inside one `send`
    pub max_fallback_depth: u32,
    /// Per-listener event queue capacity
    pub event_queue_capacity: usize,
    /// Longest a single listener invocation may run
    pub listener_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_backoff_base_ms: 5,
            conflict_backoff_max_ms: 250,
            unbounded_retry_timeout_ms: None,
            max_fallback_depth: 8,
            event_queue_capacity: 1024,
            listener_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `SCHEMATIC_ENGINE__*` environment variables
    pub fn load() -> ConfigResult<Self> {
        Self::layered(None, Self::environment())
    }

    /// Defaults overlaid with `path`, then with the environment
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::layered(Some(path.as_ref()), Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    fn layered(path: Option<&Path>, environment: Environment) -> ConfigResult<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(|e| ConfigurationError::load_failed("defaults", e))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading engine configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        let config: Self = builder
            .add_source(environment)
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigurationError::load_failed(source_name, e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.conflict_backoff_base_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "conflict_backoff_base_ms",
                self.conflict_backoff_base_ms,
                "must be greater than zero",
            ));
        }
        if self.conflict_backoff_max_ms < self.conflict_backoff_base_ms {
            return Err(ConfigurationError::invalid_value(
                "conflict_backoff_max_ms",
                self.conflict_backoff_max_ms,
                "must not be below conflict_backoff_base_ms",
            ));
        }
        if self.unbounded_retry_timeout_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "unbounded_retry_timeout_ms",
                0,
                "omit the field to disable the limit",
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "event_queue_capacity",
                0,
                "must be greater than zero",
            ));
        }
        if self.listener_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "listener_timeout_ms",
                0,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (zero-based): `base * 2^retry`, capped
    pub fn conflict_backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .conflict_backoff_base_ms
            .saturating_mul(factor)
            .min(self.conflict_backoff_max_ms);
        Duration::from_millis(millis)
    }

    pub fn unbounded_retry_timeout(&self) -> Option<Duration> {
        self.unbounded_retry_timeout_ms.map(Duration::from_millis)
    }

    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }
}
