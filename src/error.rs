//! Crate-level error types.
//!
//! `IntegrationStreamError` is what every store, emitter and orchestration
//! component returns. Processor-facing failures live in
//! [`crate::orchestration::processor::ProcessorError`] instead, since those are
//! classified by the retry policy rather than propagated.

use crate::messaging::MessagingError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IntegrationStreamError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("State transition error: {0}")]
    StateTransitionError(String),

    #[error("Orchestration error: {0}")]
    OrchestrationError(String),

    #[error("Messaging error: {0}")]
    MessagingError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Contract violation [{code}]: {message}")]
    ContractViolation { code: String, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// A state transition touched an unexpected number of rows, meaning the
    /// unit was mutated concurrently. Never swallowed.
    #[error("Expected {expected} affected row(s) updating {entity} {id}, got {actual}")]
    UnexpectedRowCount {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        actual: u64,
    },
}

impl IntegrationStreamError {
    pub fn contract_violation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the error indicates a defect that must reach the transport so
    /// its redelivery/DLQ policy takes over.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedRowCount { .. }
                | Self::DatabaseError(_)
                | Self::StateTransitionError(_)
        )
    }
}

impl From<sqlx::Error> for IntegrationStreamError {
    fn from(err: sqlx::Error) -> Self {
        IntegrationStreamError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for IntegrationStreamError {
    fn from(error: serde_json::Error) -> Self {
        IntegrationStreamError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<MessagingError> for IntegrationStreamError {
    fn from(error: MessagingError) -> Self {
        IntegrationStreamError::MessagingError(error.to_string())
    }
}

impl From<crate::state_machine::StateMachineError> for IntegrationStreamError {
    fn from(error: crate::state_machine::StateMachineError) -> Self {
        IntegrationStreamError::StateTransitionError(error.to_string())
    }
}

impl From<config::ConfigError> for IntegrationStreamError {
    fn from(error: config::ConfigError) -> Self {
        IntegrationStreamError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IntegrationStreamError>;

/// Verify that a single-row state transition affected exactly `expected` rows.
pub fn check_update_row_count(
    entity: &'static str,
    id: Uuid,
    actual: u64,
    expected: u64,
) -> Result<()> {
    if actual != expected {
        return Err(IntegrationStreamError::UnexpectedRowCount {
            entity,
            id,
            expected,
            actual,
        });
    }
    Ok(())
}
