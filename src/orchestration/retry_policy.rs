//! # Retry Policy
//!
//! Shared failure classification for the stream and data stages.
//!
//! | Error | Unit | Run |
//! |-------|------|-----|
//! | `RateLimit` | reset to PENDING, retries untouched | DELAYED until `now + reset`, unless already stopped |
//! | `Failed`, budget left | ERROR then DELAYED `(retries + 1) * step` | untouched |
//! | `Failed`, budget spent | ERROR | ERROR (streams only) |
//! | `Callback`, `ContractViolation` | ERROR, no retry | untouched |
//!
//! Webhook-scoped units have no run: a rate limit delays the unit itself and an
//! exhausted stream marks its webhook ERROR.
//!
//! The reset reported by a processor is clamped to `[0, max_pause]`.

use super::processor::ProcessorError;
use crate::config::WorkerConfig;
use crate::constants::{locations, system};
use crate::database::StreamStore;
use crate::error::{IntegrationStreamError, Result};
use crate::models::{StreamScope, StructuredError};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Stream,
    Data,
}

/// The unit a failed invocation was working on, as loaded before invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedUnit {
    pub kind: UnitKind,
    pub id: Uuid,
    pub scope: StreamScope,
    /// Retry count before this failure
    pub retries: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    RateLimited { until: DateTime<Utc> },
    RetryScheduled { retries: i32, until: DateTime<Utc> },
    RetriesExhausted { retries: i32, run_stopped: bool },
    UnitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: i32,
    backoff_step: Duration,
    max_pause: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: i32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
            max_pause: Duration::seconds(system::MAX_RATE_LIMIT_PAUSE_SECONDS),
        }
    }

    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_stream_retries, config.retry_backoff_step())
            .with_max_pause(config.max_rate_limit_pause())
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Linear backoff for a unit that had `retries` prior failures
    pub fn backoff_delay(&self, retries: i32) -> Duration {
        self.backoff_step * (retries.max(0) + 1)
    }

    pub fn should_retry(&self, retries: i32) -> bool {
        retries + 1 <= self.max_retries
    }

    /// When a rate-limited unit (or its run) may resume
    pub fn rate_limit_until(&self, reset_seconds: i64) -> Result<DateTime<Utc>> {
        let pause = match Duration::try_seconds(reset_seconds.max(0)) {
            Some(pause) if pause <= self.max_pause => pause,
            _ => {
                warn!(
                    reset_seconds,
                    max_pause_seconds = self.max_pause.num_seconds(),
                    "Rate limit reset exceeds the maximum pause, clamping"
                );
                self.max_pause
            }
        };

        Utc::now().checked_add_signed(pause).ok_or_else(|| {
            IntegrationStreamError::ValidationError(format!(
                "rate limit pause of {}s is out of range",
                pause.num_seconds()
            ))
        })
    }

    /// Persist the consequences of a failed invocation
    pub async fn apply(
        &self,
        store: &dyn StreamStore,
        unit: &FailedUnit,
        err: &ProcessorError,
        location: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<FailureOutcome> {
        match err {
            ProcessorError::RateLimit { reset_seconds } => {
                self.pause_for_rate_limit(store, unit, *reset_seconds).await
            }
            ProcessorError::Callback { .. } | ProcessorError::ContractViolation { .. } => {
                let structured = err.to_structured(location, message, metadata);
                mark_unit_error(store, unit, &structured).await?;
                Ok(FailureOutcome::UnitFailed)
            }
            ProcessorError::Failed { .. } => {
                let structured = err.to_structured(location, message, metadata);
                mark_unit_error(store, unit, &structured).await?;
                self.schedule_retry(store, unit).await
            }
        }
    }

    async fn pause_for_rate_limit(
        &self,
        store: &dyn StreamStore,
        unit: &FailedUnit,
        reset_seconds: i64,
    ) -> Result<FailureOutcome> {
        let until = self.rate_limit_until(reset_seconds)?;

        match unit.scope {
            StreamScope::Run { run_id } => {
                warn!(
                    unit_id = %unit.id,
                    run_id = %run_id,
                    reset_seconds,
                    "Rate limited, delaying run"
                );
                match unit.kind {
                    UnitKind::Stream => store.reset_stream(unit.id).await?,
                    UnitKind::Data => store.reset_data(unit.id).await?,
                }
                if !store.delay_run(run_id, until).await? {
                    info!(run_id = %run_id, "Run already stopped, not delaying it");
                }
            }
            StreamScope::Webhook { webhook_id } => {
                warn!(
                    unit_id = %unit.id,
                    webhook_id = %webhook_id,
                    reset_seconds,
                    "Rate limited, delaying unit"
                );
                match unit.kind {
                    UnitKind::Stream => store.delay_stream(unit.id, until).await?,
                    UnitKind::Data => store.delay_data(unit.id, until).await?,
                }
            }
        }

        Ok(FailureOutcome::RateLimited { until })
    }

    async fn schedule_retry(
        &self,
        store: &dyn StreamStore,
        unit: &FailedUnit,
    ) -> Result<FailureOutcome> {
        let retries = unit.retries + 1;

        if self.should_retry(unit.retries) {
            let until = Utc::now() + self.backoff_delay(unit.retries);
            match unit.kind {
                UnitKind::Stream => store.delay_stream(unit.id, until).await?,
                UnitKind::Data => store.delay_data(unit.id, until).await?,
            }
            info!(unit_id = %unit.id, retries, until = %until, "Retry scheduled");
            return Ok(FailureOutcome::RetryScheduled { retries, until });
        }

        let run_stopped = match (unit.kind, unit.scope) {
            (UnitKind::Stream, StreamScope::Run { run_id }) => {
                let structured =
                    StructuredError::new(locations::STREAM_RUN_STOP, "Stream reached maximum retries!")
                        .with_metadata(Some(json!({
                            "retries": retries,
                            "maxRetries": self.max_retries,
                        })));
                store.mark_run_error(run_id, &structured).await?;
                warn!(unit_id = %unit.id, run_id = %run_id, retries, "Stream reached maximum retries, run stopped");
                true
            }
            (UnitKind::Stream, StreamScope::Webhook { webhook_id }) => {
                let structured =
                    StructuredError::new(locations::STREAM_RUN_STOP, "Stream reached maximum retries!")
                        .with_metadata(Some(json!({
                            "retries": retries,
                            "maxRetries": self.max_retries,
                        })));
                store.mark_webhook_error(webhook_id, &structured).await?;
                warn!(unit_id = %unit.id, webhook_id = %webhook_id, retries, "Webhook stream reached maximum retries");
                false
            }
            (UnitKind::Data, _) => {
                warn!(unit_id = %unit.id, retries, "Data unit reached maximum retries");
                false
            }
        };

        Ok(FailureOutcome::RetriesExhausted {
            retries,
            run_stopped,
        })
    }
}

async fn mark_unit_error(
    store: &dyn StreamStore,
    unit: &FailedUnit,
    structured: &StructuredError,
) -> Result<()> {
    match unit.kind {
        UnitKind::Stream => store.mark_stream_error(unit.id, structured).await,
        UnitKind::Data => store.mark_data_error(unit.id, structured).await,
    }
}
