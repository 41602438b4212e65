//! Configuration for the acknowledgment dispatcher

use crate::error::{ConfigurationError, ValidationError};
use crate::executor::ExecutorSettings;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `ACK__RETRY__MAX_ATTEMPTS=3`
pub const ENV_PREFIX: &str = "ACK";

/// Dispatcher configuration
///
/// Every field carries a default so an empty file, or no file at all, yields a
/// usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Retry settings shared by the three executors
    pub retry: RetryConfig,

    /// Maximum pending items per executor (None = unbounded)
    pub queue_capacity: Option<usize>,

    /// How long disposal waits for each executor to stop, in milliseconds
    pub shutdown_timeout_ms: u64,

    /// Whether the broker routes rejected messages to a dead-letter exchange
    pub native_dead_letter: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            queue_capacity: None,
            shutdown_timeout_ms: 5_000,
            native_dead_letter: true,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total executions per item, including the first
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay
    pub jitter_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            use_jitter: policy.use_jitter,
            jitter_percent: policy.jitter_percent,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from an optional file and `ACK__` environment variables
    ///
    /// Environment variables override file values. The file format is taken
    /// from its extension (yaml, json, toml). The result is validated before it
    /// is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::Missing {
                    key: path.display().to_string(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: DispatcherConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        config.validate().map_err(|e| ConfigurationError::Invalid {
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Check the values for consistency
    pub fn validate(&self) -> Result<(), ValidationError> {
        let retry = &self.retry;

        if retry.max_attempts == 0 {
            return Err(ValidationError::OutOfRange {
                field: "retry.max_attempts".to_string(),
                message: "at least one attempt is required".to_string(),
            });
        }

        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            return Err(ValidationError::OutOfRange {
                field: "retry.backoff_multiplier".to_string(),
                message: format!("{} is below 1.0", retry.backoff_multiplier),
            });
        }

        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ValidationError::OutOfRange {
                field: "retry.initial_delay_ms".to_string(),
                message: format!(
                    "{}ms exceeds retry.max_delay_ms ({}ms)",
                    retry.initial_delay_ms, retry.max_delay_ms
                ),
            });
        }

        if !(0.0..=1.0).contains(&retry.jitter_percent) {
            return Err(ValidationError::OutOfRange {
                field: "retry.jitter_percent".to_string(),
                message: format!("{} is outside 0.0..=1.0", retry.jitter_percent),
            });
        }

        if self.queue_capacity == Some(0) {
            return Err(ValidationError::OutOfRange {
                field: "queue_capacity".to_string(),
                message: "capacity must be greater than zero".to_string(),
            });
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "shutdown_timeout_ms".to_string(),
                message: "disposal needs a non-zero wait for in-flight attempts".to_string(),
            });
        }

        Ok(())
    }

    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.retry;
        let policy = RetryPolicy::new(
            retry.max_attempts,
            Duration::from_millis(retry.initial_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
            retry.backoff_multiplier,
        );

        if retry.use_jitter {
            policy.with_jitter_percent(retry.jitter_percent)
        } else {
            policy.without_jitter()
        }
    }

    /// Disposal wait per executor
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Settings for an executor with the given name
    pub fn executor_settings(&self, name: &str) -> ExecutorSettings {
        let settings = ExecutorSettings::new(name)
            .with_retry_policy(self.retry_policy())
            .with_shutdown_timeout(self.shutdown_timeout());

        match self.queue_capacity {
            Some(capacity) => settings.with_queue_capacity(capacity),
            None => settings,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
