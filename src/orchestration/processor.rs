//! # Platform Processor Interface
//!
//! A [`PlatformProcessor`] is the per-platform plug-in that knows how to fetch
//! one page of raw data (`process_stream`) and how to turn one raw payload into
//! canonical results (`process_data`). It reports everything else through the
//! context it is handed and signals failure through [`ProcessorError`], which
//! the retry policy classifies.

use super::context::{DataContext, StreamContext};
use crate::constants::error_codes;
use crate::error::IntegrationStreamError;
use crate::models::StructuredError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The platform asked us to back off; pauses the whole run
    #[error("Rate limited, reset in {reset_seconds}s")]
    RateLimit { reset_seconds: i64 },

    /// Any processor-side failure; retried with backoff
    #[error("{message}")]
    Failed {
        message: String,
        stack: Option<String>,
    },

    /// A context callback failed to persist or emit; the run is already
    /// stopped when this surfaces
    #[error("Callback failed at {location}: {message}")]
    Callback { location: String, message: String },

    #[error("Contract violation [{code}]: {message}")]
    ContractViolation { code: String, message: String },
}

impl ProcessorError {
    pub fn rate_limit(reset_seconds: i64) -> Self {
        Self::RateLimit { reset_seconds }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stack: None,
        }
    }

    pub fn callback(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Callback {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::RateLimit { .. } => error_codes::RATE_LIMIT,
            Self::Failed { .. } => error_codes::PROCESSOR_FAILURE,
            Self::Callback { .. } => error_codes::CALLBACK_FAILURE,
            Self::ContractViolation { code, .. } => code,
        }
    }

    fn stack(&self) -> Option<String> {
        match self {
            Self::Failed { stack, .. } => stack.clone(),
            _ => None,
        }
    }

    /// Structured payload persisted on the unit when this error is recorded
    pub fn to_structured(
        &self,
        location: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> StructuredError {
        StructuredError::new(location, message)
            .with_metadata(metadata)
            .with_error_message(self.to_string())
            .with_error_stack(self.stack())
            .with_code(self.error_code())
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed {
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
        }
    }
}

impl From<IntegrationStreamError> for ProcessorError {
    fn from(err: IntegrationStreamError) -> Self {
        match err {
            IntegrationStreamError::ContractViolation { code, message } => {
                Self::ContractViolation { code, message }
            }
            other => Self::failed(other.to_string()),
        }
    }
}

/// Per-platform fetch and transform logic.
///
/// Implementations must be stateless across invocations; everything an
/// invocation needs arrives through its context.
#[async_trait]
pub trait PlatformProcessor: Send + Sync {
    /// Platform type this processor is registered under
    fn platform(&self) -> &str;

    /// Fetch one page or unit of raw data
    async fn process_stream(&self, ctx: &StreamContext) -> Result<(), ProcessorError>;

    /// Transform one raw payload into canonical results
    async fn process_data(&self, ctx: &DataContext) -> Result<(), ProcessorError>;
}
