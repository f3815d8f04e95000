//! # Stream Orchestrator
//!
//! Stream stage of the pipeline: loads a stream with its integration and run,
//! applies the run/integration guards, claims the stream, invokes the
//! platform's `process_stream` and persists the outcome.
//!
//! ## Invocation lifecycle
//!
//! ```text
//! load ──▶ guards ──▶ processor lookup ──▶ PROCESSING ──▶ process_stream
//!            │               │                               │
//!          skip        ERROR (no_processor)       PROCESSED / abort / retry policy
//!                                     │
//!                    touch run + "run stream finished" (run scope, always)
//! ```
//!
//! Once a run-scoped stream passes the guards, the run heartbeat and the
//! "run stream finished" notification are sent exactly once, whatever the
//! outcome, so the run-completion detector is never starved.

use super::context::StreamContext;
use super::outcome::{InvocationOutcome, SkipReason};
use super::retry_policy::{FailedUnit, FailureOutcome, RetryPolicy, UnitKind};
use super::services::WorkerServices;
use crate::constants::{error_codes, locations};
use crate::error::{IntegrationStreamError, Result};
use crate::logging::log_stream_operation;
use crate::messaging::MessageLease;
use crate::models::{StreamProcessingInfo, StreamScope, StructuredError};
use crate::state_machine::{RunState, StreamState};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct StreamOrchestrator {
    services: WorkerServices,
    retry_policy: RetryPolicy,
}

impl StreamOrchestrator {
    pub fn new(services: WorkerServices) -> Self {
        let retry_policy = RetryPolicy::from_config(&services.config);
        Self {
            services,
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Process one stream. `lease` is the queue message the request arrived
    /// on, if any, so the processor can extend its visibility.
    #[instrument(skip(self, lease), fields(stream_id = %stream_id))]
    pub async fn process_stream(
        &self,
        stream_id: Uuid,
        lease: Option<MessageLease>,
    ) -> Result<InvocationOutcome> {
        let info = match self.services.store.get_stream_info(stream_id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!("Stream not found, already handled or invalid");
                return Ok(InvocationOutcome::NotFound);
            }
            Err(IntegrationStreamError::ContractViolation { code, message }) => {
                error!(code = %code, "Stream violates its owner contract: {message}");
                let structured =
                    StructuredError::new(locations::CHECK_STREAM_PROCESSOR, "Invalid stream!")
                        .with_error_message(message)
                        .with_code(code);
                self.services
                    .store
                    .mark_stream_error(stream_id, &structured)
                    .await?;
                return Ok(InvocationOutcome::Failed(FailureOutcome::UnitFailed));
            }
            Err(err) => return Err(err),
        };

        self.process_loaded(info, lease).await
    }

    /// Process the root stream of an incoming webhook, creating it on first
    /// delivery
    #[instrument(skip(self, lease), fields(webhook_id = %webhook_id))]
    pub async fn process_webhook_stream(
        &self,
        webhook_id: Uuid,
        lease: Option<MessageLease>,
    ) -> Result<InvocationOutcome> {
        let store = &self.services.store;

        let Some(webhook) = store.get_webhook(webhook_id).await? else {
            warn!("Webhook not found");
            return Ok(InvocationOutcome::NotFound);
        };

        let stream_id = match store.get_stream_id_by_webhook_id(webhook_id).await? {
            Some(stream_id) => stream_id,
            None => {
                let stream_id = store.publish_webhook_stream(&webhook).await?;
                debug!(stream_id = %stream_id, "Created webhook stream");
                stream_id
            }
        };

        let Some(info) = store.get_stream_info(stream_id).await? else {
            warn!(stream_id = %stream_id, "Webhook stream disappeared before processing");
            return Ok(InvocationOutcome::NotFound);
        };

        self.process_loaded(info, lease).await
    }

    async fn process_loaded(
        &self,
        info: StreamProcessingInfo,
        lease: Option<MessageLease>,
    ) -> Result<InvocationOutcome> {
        if let Some(reason) = self.check_guards(&info).await? {
            info!(
                stream_id = %info.stream.id,
                reason = ?reason,
                "Skipping stream"
            );
            return Ok(InvocationOutcome::Skipped(reason));
        }

        let outcome = self.invoke(&info, lease).await;
        let finished = self.finish_run_invocation(&info).await;

        match (outcome, finished) {
            (Ok(outcome), Ok(())) => {
                log_stream_operation(
                    "process_stream",
                    info.stream.id,
                    info.stream.scope.run_id(),
                    &info.integration.platform,
                    outcome.status(),
                    None,
                );
                Ok(outcome)
            }
            (Err(err), finished) => {
                if let Err(finish_err) = finished {
                    error!(
                        stream_id = %info.stream.id,
                        error = %finish_err,
                        "Failed to notify run after stream failure"
                    );
                }
                Err(err)
            }
            (Ok(_), Err(finish_err)) => Err(finish_err),
        }
    }

    async fn check_guards(&self, info: &StreamProcessingInfo) -> Result<Option<SkipReason>> {
        let store = &self.services.store;
        let stream = &info.stream;

        if let Some(run) = &info.run {
            match run.state {
                RunState::Delayed => return Ok(Some(SkipReason::RunDelayed)),
                RunState::IntegrationDeleted => {
                    store.delete_stream(stream.id).await?;
                    return Ok(Some(SkipReason::RunDeleted));
                }
                RunState::Error => return Ok(Some(SkipReason::RunStopped)),
                _ => {}
            }
        }

        if info.integration.needs_reconnect() {
            store.delete_stream(stream.id).await?;
            if let StreamScope::Webhook { webhook_id } = stream.scope {
                store.delete_webhook(webhook_id).await?;
            }
            return Ok(Some(SkipReason::NeedsReconnect));
        }

        if stream.state != StreamState::Pending {
            return Ok(Some(SkipReason::NotPending(stream.state.to_string())));
        }

        Ok(None)
    }

    async fn invoke(
        &self,
        info: &StreamProcessingInfo,
        lease: Option<MessageLease>,
    ) -> Result<InvocationOutcome> {
        let store = &self.services.store;
        let stream = &info.stream;
        let platform = info.integration.platform.as_str();

        let Some(processor) = self.services.registry.get(platform) else {
            let location = match stream.scope {
                StreamScope::Run { .. } => locations::CHECK_STREAM_PROCESSOR,
                StreamScope::Webhook { .. } => locations::CHECK_WEBHOOK_STREAM_PROCESSOR,
            };
            let structured =
                StructuredError::new(location, "No stream processor found for integration!")
                    .with_metadata(Some(json!({ "type": platform })))
                    .with_code(error_codes::NO_PROCESSOR);
            error!(stream_id = %stream.id, platform, "No stream processor found for integration");

            store.mark_stream_error(stream.id, &structured).await?;
            if let StreamScope::Webhook { webhook_id } = stream.scope {
                store.mark_webhook_error(webhook_id, &structured).await?;
            }
            return Ok(InvocationOutcome::Failed(FailureOutcome::UnitFailed));
        };

        store.mark_stream_processing(stream.id).await?;
        if let Some(run_id) = stream.scope.run_id() {
            store.touch_run(run_id).await?;
        }

        let ctx = StreamContext::new(self.services.clone(), info, lease);
        debug!(
            stream_id = %stream.id,
            identifier = %stream.identifier,
            stream_type = ?ctx.stream_type(),
            "Invoking stream processor"
        );
        let result = processor.process_stream(&ctx).await;

        if let Some(kind) = ctx.aborted() {
            info!(stream_id = %stream.id, abort = ?kind, "Processor aborted stream");
            return Ok(InvocationOutcome::Aborted(kind));
        }

        match result {
            Ok(()) => {
                store.mark_stream_processed(stream.id).await?;
                if let StreamScope::Webhook { webhook_id } = stream.scope {
                    store.mark_webhook_processed(webhook_id).await?;
                }
                Ok(InvocationOutcome::Processed)
            }
            Err(err) => {
                let (location, message) = match stream.scope {
                    StreamScope::Run { .. } => {
                        (locations::STREAM_PROCESS, "Error while processing stream!")
                    }
                    StreamScope::Webhook { .. } => (
                        locations::WEBHOOK_STREAM_PROCESS,
                        "Error while processing webhook stream!",
                    ),
                };
                error!(
                    stream_id = %stream.id,
                    platform,
                    retries = stream.retries,
                    error = %err,
                    "{message}"
                );

                let unit = FailedUnit {
                    kind: UnitKind::Stream,
                    id: stream.id,
                    scope: stream.scope,
                    retries: stream.retries,
                };
                let outcome = self
                    .retry_policy
                    .apply(
                        store.as_ref(),
                        &unit,
                        &err,
                        location,
                        message,
                        Some(json!({ "identifier": stream.identifier })),
                    )
                    .await?;
                Ok(InvocationOutcome::Failed(outcome))
            }
        }
    }

    async fn finish_run_invocation(&self, info: &StreamProcessingInfo) -> Result<()> {
        let Some(run_id) = info.stream.scope.run_id() else {
            return Ok(());
        };

        // The notification goes out even when the heartbeat fails
        let touched = self.services.store.touch_run(run_id).await;
        if let Err(err) = &touched {
            error!(run_id = %run_id, error = %err, "Failed to touch run");
        }
        self.services
            .run_emitter
            .stream_processed(info.stream.tenant_id, &info.integration.platform, run_id)
            .await?;
        touched
    }
}
