//! # Worker Configuration
//!
//! Layered configuration for stream/data workers: built-in defaults, an
//! optional YAML file, then `INTEGRATION_STREAM__`-prefixed environment
//! variables (nested keys separated by `__`).

use crate::constants::{queues, system};
use crate::error::{IntegrationStreamError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "config/integration-stream.yaml";
const CONFIG_PATH_ENV: &str = "INTEGRATION_STREAM_CONFIG_PATH";
const ENV_PREFIX: &str = "INTEGRATION_STREAM";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub database_url: String,

    /// Retry budget for a single stream or data unit
    pub max_stream_retries: i32,

    /// Linear backoff step; a unit with `n` prior retries is delayed
    /// `(n + 1) * retry_backoff_step_seconds`
    pub retry_backoff_step_seconds: i64,

    /// Local bound on concurrently in-flight unit invocations
    pub max_concurrent_invocations: usize,

    /// Age after which a PROCESSING stream is considered abandoned by a
    /// crashed worker and reset to PENDING
    pub processing_timeout_seconds: i64,

    /// Longest pause a processor-reported rate limit may impose
    pub max_rate_limit_pause_seconds: i64,

    /// Cap on streams a single run may hold; `None` disables the cap
    pub max_streams_per_run: Option<i64>,

    /// Page size for the delayed stream resetter
    pub delayed_stream_batch_size: i64,

    /// TTL for processor cache entries
    pub cache_ttl_seconds: u64,

    pub queues: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub stream_queue: String,
    pub data_queue: String,
    pub run_queue: String,
    pub data_sink_queue: String,
    pub poll_interval_ms: u64,
    pub visibility_timeout_seconds: i32,
    pub batch_size: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/integration_stream_development".to_string(),
            max_stream_retries: system::DEFAULT_MAX_STREAM_RETRIES,
            retry_backoff_step_seconds: system::RETRY_BACKOFF_STEP_SECONDS,
            max_concurrent_invocations: 10,
            processing_timeout_seconds: 3600,
            max_rate_limit_pause_seconds: system::MAX_RATE_LIMIT_PAUSE_SECONDS,
            max_streams_per_run: Some(100_000),
            delayed_stream_batch_size: 10,
            cache_ttl_seconds: 24 * 60 * 60,
            queues: QueueConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_queue: queues::STREAM_QUEUE.to_string(),
            data_queue: queues::DATA_QUEUE.to_string(),
            run_queue: queues::RUN_QUEUE.to_string(),
            data_sink_queue: queues::DATA_SINK_QUEUE.to_string(),
            poll_interval_ms: 1000,
            visibility_timeout_seconds: 300,
            batch_size: 10,
        }
    }
}

impl WorkerConfig {
    /// Load defaults, the YAML file named by `INTEGRATION_STREAM_CONFIG_PATH`
    /// (or `config/integration-stream.yaml` when present) and env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(Some(&path))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading worker configuration file");
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: WorkerConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Plain environment loader for deployments that only set the essentials
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(max_retries) = std::env::var("MAX_STREAM_RETRIES") {
            config.max_stream_retries = max_retries.parse().map_err(|e| {
                IntegrationStreamError::ConfigurationError(format!(
                    "Invalid max_stream_retries: {e}"
                ))
            })?;
        }

        if let Ok(concurrency) = std::env::var("MAX_CONCURRENT_INVOCATIONS") {
            config.max_concurrent_invocations = concurrency.parse().map_err(|e| {
                IntegrationStreamError::ConfigurationError(format!(
                    "Invalid max_concurrent_invocations: {e}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_stream_retries < 0 {
            return Err(IntegrationStreamError::ConfigurationError(
                "max_stream_retries must not be negative".to_string(),
            ));
        }
        if self.retry_backoff_step_seconds <= 0 {
            return Err(IntegrationStreamError::ConfigurationError(
                "retry_backoff_step_seconds must be positive".to_string(),
            ));
        }
        if self.max_concurrent_invocations == 0 {
            return Err(IntegrationStreamError::ConfigurationError(
                "max_concurrent_invocations must be at least 1".to_string(),
            ));
        }
        if self.processing_timeout_seconds <= 0 {
            return Err(IntegrationStreamError::ConfigurationError(
                "processing_timeout_seconds must be positive".to_string(),
            ));
        }
        if !(1..=system::MAX_RATE_LIMIT_PAUSE_SECONDS).contains(&self.max_rate_limit_pause_seconds) {
            return Err(IntegrationStreamError::ConfigurationError(format!(
                "max_rate_limit_pause_seconds must be between 1 and {}",
                system::MAX_RATE_LIMIT_PAUSE_SECONDS
            )));
        }
        if matches!(self.max_streams_per_run, Some(cap) if cap <= 0) {
            return Err(IntegrationStreamError::ConfigurationError(
                "max_streams_per_run must be positive when set".to_string(),
            ));
        }
        if self.queues.batch_size <= 0 || self.queues.visibility_timeout_seconds <= 0 {
            return Err(IntegrationStreamError::ConfigurationError(
                "queue batch_size and visibility_timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_backoff_step(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_backoff_step_seconds)
    }

    pub fn max_rate_limit_pause(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_rate_limit_pause_seconds)
    }

    pub fn processing_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.processing_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queues.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_stream_retries, 5);
        assert_eq!(config.retry_backoff_step(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "max_stream_retries: 2\nmax_concurrent_invocations: 4\nqueues:\n  stream_queue: custom_streams\n"
        )
        .unwrap();

        let config = WorkerConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.max_stream_retries, 2);
        assert_eq!(config.max_concurrent_invocations, 4);
        assert_eq!(config.queues.stream_queue, "custom_streams");
        assert_eq!(config.queues.data_queue, queues::DATA_QUEUE);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            WorkerConfig::load_from(Some(Path::new("/nonexistent/integration-stream.yaml")))
                .unwrap();
        assert_eq!(config.processing_timeout_seconds, 3600);
    }

    #[test]
    fn test_validation_bounds_rate_limit_pause() {
        let config = WorkerConfig {
            max_rate_limit_pause_seconds: i64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            max_rate_limit_pause_seconds: 3600,
            ..Default::default()
        };
        assert_eq!(config.max_rate_limit_pause(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = WorkerConfig {
            max_concurrent_invocations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
