//! # Data Transformer
//!
//! Data stage of the pipeline. Mirrors the stream orchestrator for a single
//! raw data unit: guards, processor lookup, `process_data`, then either the
//! success transition, nothing (explicit abort) or the shared retry policy.
//!
//! A unit is claimed (PENDING to PROCESSING) right before invocation, so a
//! redelivered message for the same unit is skipped instead of publishing
//! its results twice. A unit whose processor only stopped the run is handed
//! back to PENDING. Exhausting a data unit's retry budget leaves the run
//! running.
//!
//! Units left PENDING by a run pause are re-emitted when the run continues;
//! see [`StreamMaintenance::continue_processing_run_streams`](super::StreamMaintenance::continue_processing_run_streams).

use super::context::{AbortKind, DataContext};
use super::outcome::{InvocationOutcome, SkipReason};
use super::retry_policy::{FailedUnit, FailureOutcome, RetryPolicy, UnitKind};
use super::services::WorkerServices;
use crate::constants::{error_codes, locations};
use crate::error::{IntegrationStreamError, Result};
use crate::logging::log_data_operation;
use crate::models::{DataProcessingInfo, StructuredError};
use crate::state_machine::{DataUnitState, RunState};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct DataTransformer {
    services: WorkerServices,
    retry_policy: RetryPolicy,
}

impl DataTransformer {
    pub fn new(services: WorkerServices) -> Self {
        let retry_policy = RetryPolicy::from_config(&services.config);
        Self {
            services,
            retry_policy,
        }
    }

    #[instrument(skip(self), fields(data_id = %data_id))]
    pub async fn process_data(&self, data_id: Uuid) -> Result<InvocationOutcome> {
        let info = match self.services.store.get_data_info(data_id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!("Data unit not found, already handled or invalid");
                return Ok(InvocationOutcome::NotFound);
            }
            Err(IntegrationStreamError::ContractViolation { code, message }) => {
                error!(code = %code, "Data unit violates its owner contract: {message}");
                let structured =
                    StructuredError::new(locations::CHECK_DATA_PROCESSOR, "Invalid data unit!")
                        .with_error_message(message)
                        .with_code(code);
                self.services
                    .store
                    .mark_data_error(data_id, &structured)
                    .await?;
                return Ok(InvocationOutcome::Failed(FailureOutcome::UnitFailed));
            }
            Err(err) => return Err(err),
        };

        if let Some(reason) = Self::check_guards(&info) {
            info!(data_id = %data_id, reason = ?reason, "Skipping data unit");
            return Ok(InvocationOutcome::Skipped(reason));
        }

        let outcome = self.invoke(&info).await?;
        log_data_operation(
            "process_data",
            info.data.id,
            info.data.stream_id,
            &info.integration.platform,
            outcome.status(),
            None,
        );
        Ok(outcome)
    }

    fn check_guards(info: &DataProcessingInfo) -> Option<SkipReason> {
        if let Some(run) = &info.run {
            match run.state {
                RunState::Error => return Some(SkipReason::RunStopped),
                RunState::Delayed => return Some(SkipReason::RunDelayed),
                RunState::IntegrationDeleted => return Some(SkipReason::RunDeleted),
                _ => {}
            }
        }

        if info.integration.needs_reconnect() {
            return Some(SkipReason::NeedsReconnect);
        }

        if info.data.state != DataUnitState::Pending {
            return Some(SkipReason::NotPending(info.data.state.to_string()));
        }

        None
    }

    async fn invoke(&self, info: &DataProcessingInfo) -> Result<InvocationOutcome> {
        let store = &self.services.store;
        let unit = &info.data;
        let platform = info.integration.platform.as_str();

        let Some(processor) = self.services.registry.get(platform) else {
            let structured = StructuredError::new(
                locations::CHECK_DATA_PROCESSOR,
                "No data processor found for integration!",
            )
            .with_metadata(Some(json!({ "type": platform })))
            .with_code(error_codes::NO_PROCESSOR);
            error!(data_id = %unit.id, platform, "No data processor found for integration");

            store.mark_data_error(unit.id, &structured).await?;
            return Ok(InvocationOutcome::Failed(FailureOutcome::UnitFailed));
        };

        if !store.claim_data(unit.id).await? {
            info!(data_id = %unit.id, "Data unit claimed by another delivery");
            return Ok(InvocationOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        let ctx = DataContext::new(self.services.clone(), info);
        debug!(data_id = %unit.id, stream_id = %unit.stream_id, "Invoking data processor");
        let result = processor.process_data(&ctx).await;

        if let Some(kind) = ctx.aborted() {
            info!(data_id = %unit.id, abort = ?kind, "Processor aborted data unit");
            if kind == AbortKind::Run && unit.scope.run_id().is_some() {
                store.reset_data(unit.id).await?;
            }
            return Ok(InvocationOutcome::Aborted(kind));
        }

        match result {
            Ok(()) => {
                store.mark_data_processed(unit.id).await?;
                Ok(InvocationOutcome::Processed)
            }
            Err(err) => {
                error!(
                    data_id = %unit.id,
                    platform,
                    retries = unit.retries,
                    error = %err,
                    "Error while processing data!"
                );

                let failed = FailedUnit {
                    kind: UnitKind::Data,
                    id: unit.id,
                    scope: unit.scope,
                    retries: unit.retries,
                };
                let outcome = self
                    .retry_policy
                    .apply(
                        store.as_ref(),
                        &failed,
                        &err,
                        locations::DATA_PROCESS,
                        "Error while processing data!",
                        Some(json!({ "streamId": unit.stream_id })),
                    )
                    .await?;
                Ok(InvocationOutcome::Failed(outcome))
            }
        }
    }
}
