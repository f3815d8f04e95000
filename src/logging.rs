//! # Structured Logging Module
//!
//! Environment-aware structured logging. Production emits JSON lines, every
//! other environment emits human-readable output. `RUST_LOG` overrides the
//! environment-derived level.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if environment == "production" {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Another subscriber may already be installed (tests, embedding host)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("INTEGRATION_STREAM_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for stream operations
pub fn log_stream_operation(
    operation: &str,
    stream_id: Uuid,
    run_id: Option<Uuid>,
    platform: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        stream_id = %stream_id,
        run_id = ?run_id,
        platform = %platform,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "STREAM_OPERATION"
    );
}

/// Log structured data for data unit operations
pub fn log_data_operation(
    operation: &str,
    data_id: Uuid,
    stream_id: Uuid,
    platform: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        data_id = %data_id,
        stream_id = %stream_id,
        platform = %platform,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "DATA_OPERATION"
    );
}
