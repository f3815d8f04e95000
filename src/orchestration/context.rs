//! # Execution Contexts
//!
//! One context is built per invocation and handed to the platform processor.
//! It carries a snapshot of the integration and its owning run or webhook,
//! cache handles (per `(tenant, platform)`, per integration and global), the
//! shared request limiters, and the callbacks through which the processor
//! reports work without knowing about queues or storage.
//!
//! Callback failures are persistence or emitter malfunctions rather than
//! processor logic errors: for run-scoped units the run is marked ERROR before
//! the failure is returned as [`ProcessorError::Callback`].

use super::limiter::{ConcurrentRequestLimiter, RateLimiter};
use super::processor::ProcessorError;
use super::services::WorkerServices;
use crate::cache::NamespacedCache;
use crate::constants::{error_codes, locations, system};
use crate::messaging::MessageLease;
use crate::models::{
    ActivityData, ChildStreamInsert, DataProcessingInfo, DataUnit, IntegrationSnapshot, IntegrationStream,
    NewIntegrationResult, NewStream, ResultType, StreamProcessingInfo, StreamScope, StreamType,
    StructuredError,
};
use parking_lot::Mutex;
use serde_json::json;
use std::fmt::Display;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Explicit abort requested by the processor during an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    Unit,
    Run,
}

struct ContextCore {
    services: WorkerServices,
    integration: IntegrationSnapshot,
    tenant_id: Uuid,
    scope: StreamScope,
    onboarding: bool,
    cache: NamespacedCache,
    global_cache: NamespacedCache,
    integration_cache: NamespacedCache,
    abort: Mutex<Option<AbortKind>>,
}

impl ContextCore {
    fn new(
        services: WorkerServices,
        integration: IntegrationSnapshot,
        tenant_id: Uuid,
        scope: StreamScope,
        onboarding: bool,
    ) -> Self {
        let cache = services.namespaced_cache(tenant_id, &integration.platform);
        let global_cache = services.global_cache();
        let integration_cache = services.integration_cache(integration.id);
        Self {
            services,
            integration,
            tenant_id,
            scope,
            onboarding,
            cache,
            global_cache,
            integration_cache,
            abort: Mutex::new(None),
        }
    }

    fn rate_limiter(&self, max_requests: u32, window_seconds: u64, counter_key: &str) -> RateLimiter {
        RateLimiter::new(self.global_cache.clone(), max_requests, window_seconds, counter_key)
    }

    fn concurrent_request_limiter(
        &self,
        max_concurrent: u32,
        counter_key: &str,
    ) -> ConcurrentRequestLimiter {
        ConcurrentRequestLimiter::new(self.global_cache.clone(), max_concurrent, counter_key)
    }

    fn platform(&self) -> &str {
        &self.integration.platform
    }

    fn record_abort(&self, kind: AbortKind) {
        let mut abort = self.abort.lock();
        // A run abort outranks a unit abort within the same invocation
        if *abort != Some(AbortKind::Run) {
            *abort = Some(kind);
        }
    }

    fn aborted(&self) -> Option<AbortKind> {
        *self.abort.lock()
    }

    /// Stop the owning run (when there is one) and wrap the failure
    async fn fail_callback(
        &self,
        location: &str,
        message: &str,
        code: &str,
        err: impl Display,
    ) -> ProcessorError {
        let detail = err.to_string();
        error!(
            location,
            platform = %self.platform(),
            error = %detail,
            "{message}"
        );

        if let StreamScope::Run { run_id } = self.scope {
            let structured = StructuredError::new(location, message)
                .with_error_message(detail.clone())
                .with_code(code);
            if let Err(mark_err) = self.services.store.mark_run_error(run_id, &structured).await {
                error!(
                    run_id = %run_id,
                    error = %mark_err,
                    "Failed to stop run after callback failure"
                );
            }
        }

        ProcessorError::callback(location, format!("{message}: {detail}"))
    }

    async fn update_integration_settings(
        &self,
        settings: &serde_json::Value,
    ) -> Result<(), ProcessorError> {
        match self
            .services
            .store
            .update_integration_settings(self.integration.id, settings)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => Err(self
                .fail_callback(
                    locations::UPDATE_SETTINGS,
                    "Error while updating integration settings!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    async fn update_integration_token(&self, token: &str) -> Result<(), ProcessorError> {
        match self
            .services
            .store
            .update_integration_token(self.integration.id, token)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => Err(self
                .fail_callback(
                    locations::UPDATE_TOKEN,
                    "Error while updating integration token!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    async fn update_integration_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<(), ProcessorError> {
        match self
            .services
            .store
            .update_integration_refresh_token(self.integration.id, refresh_token)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => Err(self
                .fail_callback(
                    locations::UPDATE_REFRESH_TOKEN,
                    "Error while updating integration refresh token!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    /// Insert a child stream of `parent_id` in this context's scope and
    /// schedule it. For webhook scope a synthetic webhook owns the child.
    async fn publish_child(
        &self,
        parent_id: Uuid,
        integration_id: Uuid,
        identifier: String,
        data: Option<serde_json::Value>,
    ) -> Result<Option<Uuid>, ProcessorError> {
        let result = match self.scope {
            StreamScope::Run { run_id } => {
                self.publish_run_child(parent_id, integration_id, run_id, identifier, data)
                    .await
            }
            StreamScope::Webhook { .. } => {
                self.publish_webhook_child(parent_id, integration_id, identifier, data)
                    .await
            }
        };

        match result {
            Ok(ChildStreamInsert::Inserted(id)) => Ok(Some(id)),
            Ok(ChildStreamInsert::Duplicate) => Ok(None),
            Ok(ChildStreamInsert::CapReached { count }) => Err(self
                .fail_callback(
                    locations::PUBLISH_CHILD_STREAM,
                    "Run reached the maximum number of streams!",
                    error_codes::FAN_OUT_LIMIT,
                    format!("run already holds {count} streams"),
                )
                .await),
            Err(err) => Err(self
                .fail_callback(
                    locations::PUBLISH_CHILD_STREAM,
                    "Error while publishing child stream!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    async fn publish_run_child(
        &self,
        parent_id: Uuid,
        integration_id: Uuid,
        run_id: Uuid,
        identifier: String,
        data: Option<serde_json::Value>,
    ) -> crate::error::Result<ChildStreamInsert> {
        let child = NewStream {
            parent_id,
            scope: StreamScope::Run { run_id },
            tenant_id: self.tenant_id,
            integration_id,
            identifier,
            data,
        };

        let inserted = self
            .services
            .store
            .publish_child_stream(&child, self.services.config.max_streams_per_run)
            .await?;
        match inserted {
            ChildStreamInsert::Inserted(stream_id) => {
                self.services
                    .stream_emitter
                    .trigger_stream_processing(
                        self.tenant_id,
                        self.platform(),
                        stream_id,
                        self.onboarding,
                    )
                    .await?;
            }
            ChildStreamInsert::Duplicate => debug!(
                run_id = %run_id,
                identifier = %child.identifier,
                "Child stream already exists"
            ),
            ChildStreamInsert::CapReached { count } => warn!(
                run_id = %run_id,
                identifier = %child.identifier,
                count,
                "Run reached the maximum number of streams"
            ),
        }

        Ok(inserted)
    }

    async fn publish_webhook_child(
        &self,
        parent_id: Uuid,
        integration_id: Uuid,
        identifier: String,
        data: Option<serde_json::Value>,
    ) -> crate::error::Result<ChildStreamInsert> {
        let webhook_id = self
            .services
            .store
            .create_webhook(
                self.tenant_id,
                integration_id,
                system::GENERATED_WEBHOOK_TYPE,
                data.clone().unwrap_or_else(|| json!({})),
            )
            .await?;

        let child = NewStream {
            parent_id,
            scope: StreamScope::Webhook { webhook_id },
            tenant_id: self.tenant_id,
            integration_id,
            identifier,
            data,
        };

        let inserted = self.services.store.publish_child_stream(&child, None).await?;
        match inserted {
            ChildStreamInsert::Inserted(_) => {
                self.services
                    .stream_emitter
                    .trigger_webhook_processing(self.tenant_id, self.platform(), webhook_id)
                    .await?;
            }
            _ => debug!(
                webhook_id = %webhook_id,
                identifier = %child.identifier,
                "Child stream already exists"
            ),
        }

        Ok(inserted)
    }
}

fn abort_payload(
    location: &str,
    message: &str,
    metadata: Option<serde_json::Value>,
    error: Option<String>,
) -> StructuredError {
    let structured = StructuredError::new(location, message).with_metadata(metadata);
    match error {
        Some(error) => structured.with_error_message(error),
        None => structured,
    }
}

/// Context handed to [`PlatformProcessor::process_stream`](super::PlatformProcessor::process_stream)
pub struct StreamContext {
    core: ContextCore,
    stream: IntegrationStream,
    lease: Option<MessageLease>,
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("stream_id", &self.stream.id)
            .field("identifier", &self.stream.identifier)
            .field("scope", &self.core.scope)
            .field("platform", &self.core.platform())
            .finish()
    }
}

impl StreamContext {
    pub(crate) fn new(
        services: WorkerServices,
        info: &StreamProcessingInfo,
        lease: Option<MessageLease>,
    ) -> Self {
        Self {
            core: ContextCore::new(
                services,
                info.integration.snapshot(),
                info.stream.tenant_id,
                info.stream.scope,
                info.onboarding(),
            ),
            stream: info.stream.clone(),
            lease,
        }
    }

    pub fn integration(&self) -> &IntegrationSnapshot {
        &self.core.integration
    }

    pub fn platform(&self) -> &str {
        self.core.platform()
    }

    pub fn tenant_id(&self) -> Uuid {
        self.core.tenant_id
    }

    pub fn onboarding(&self) -> bool {
        self.core.onboarding
    }

    pub fn scope(&self) -> StreamScope {
        self.core.scope
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream.id
    }

    pub fn identifier(&self) -> &str {
        &self.stream.identifier
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream.stream_type()
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.stream.data.as_ref()
    }

    pub fn cache(&self) -> &NamespacedCache {
        &self.core.cache
    }

    /// Shared by every tenant and platform
    pub fn global_cache(&self) -> &NamespacedCache {
        &self.core.global_cache
    }

    pub fn integration_cache(&self) -> &NamespacedCache {
        &self.core.integration_cache
    }

    /// Fixed-window limiter counted in the global cache under `counter_key`
    pub fn get_rate_limiter(
        &self,
        max_requests: u32,
        window_seconds: u64,
        counter_key: &str,
    ) -> RateLimiter {
        self.core.rate_limiter(max_requests, window_seconds, counter_key)
    }

    pub fn get_concurrent_request_limiter(
        &self,
        max_concurrent: u32,
        counter_key: &str,
    ) -> ConcurrentRequestLimiter {
        self.core.concurrent_request_limiter(max_concurrent, counter_key)
    }

    pub(crate) fn aborted(&self) -> Option<AbortKind> {
        self.core.aborted()
    }

    /// Request another page. Returns the new stream id, or `None` when a
    /// stream with this identifier already exists in the same run or webhook.
    pub async fn publish_stream(
        &self,
        identifier: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Result<Option<Uuid>, ProcessorError> {
        self.core
            .publish_child(self.stream.id, self.stream.integration_id, identifier.into(), data)
            .await
    }

    /// Persist one raw payload for the data stage
    pub async fn publish_data(&self, data: serde_json::Value) -> Result<Uuid, ProcessorError> {
        let published = async {
            let data_id = self.core.services.store.publish_data(&self.stream, data).await?;
            self.core
                .services
                .data_emitter
                .trigger_data_processing(self.core.tenant_id, self.platform(), data_id)
                .await?;
            crate::error::Result::Ok(data_id)
        }
        .await;

        match published {
            Ok(data_id) => Ok(data_id),
            Err(err) => Err(self
                .core
                .fail_callback(
                    locations::PUBLISH_STREAM_DATA,
                    "Error while publishing data!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    pub async fn update_integration_settings(
        &self,
        settings: &serde_json::Value,
    ) -> Result<(), ProcessorError> {
        self.core.update_integration_settings(settings).await
    }

    pub async fn update_integration_token(&self, token: &str) -> Result<(), ProcessorError> {
        self.core.update_integration_token(token).await
    }

    pub async fn update_integration_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<(), ProcessorError> {
        self.core.update_integration_refresh_token(refresh_token).await
    }

    /// Fail this stream without retry
    pub async fn abort_with_error(
        &self,
        message: &str,
        metadata: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), ProcessorError> {
        let (location, webhook_id) = match self.core.scope {
            StreamScope::Run { .. } => (locations::STREAM_ABORT, None),
            StreamScope::Webhook { webhook_id } => {
                (locations::WEBHOOK_STREAM_ABORT, Some(webhook_id))
            }
        };
        let structured = abort_payload(location, message, metadata, error);
        warn!(stream_id = %self.stream.id, platform = %self.platform(), "{message}");

        let marked = async {
            self.core
                .services
                .store
                .mark_stream_error(self.stream.id, &structured)
                .await?;
            if let Some(webhook_id) = webhook_id {
                self.core
                    .services
                    .store
                    .mark_webhook_error(webhook_id, &structured)
                    .await?;
            }
            crate::error::Result::Ok(())
        }
        .await;

        match marked {
            Ok(()) => {
                self.core.record_abort(AbortKind::Unit);
                Ok(())
            }
            Err(err) => Err(self
                .core
                .fail_callback(location, "Error while aborting stream!", error_codes::CALLBACK_FAILURE, err)
                .await),
        }
    }

    /// Stop the whole run. For a webhook-scoped stream the webhook and the
    /// stream are marked ERROR instead.
    pub async fn abort_run_with_error(
        &self,
        message: &str,
        metadata: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), ProcessorError> {
        let store = &self.core.services.store;
        let marked = match self.core.scope {
            StreamScope::Run { run_id } => {
                warn!(run_id = %run_id, platform = %self.platform(), "{message}");
                let structured = abort_payload(locations::STREAM_RUN_ABORT, message, metadata, error);
                store.mark_run_error(run_id, &structured).await
            }
            StreamScope::Webhook { webhook_id } => {
                warn!(webhook_id = %webhook_id, platform = %self.platform(), "{message}");
                let structured =
                    abort_payload(locations::WEBHOOK_STREAM_ABORT, message, metadata, error);
                match store.mark_webhook_error(webhook_id, &structured).await {
                    Ok(()) => store.mark_stream_error(self.stream.id, &structured).await,
                    Err(err) => Err(err),
                }
            }
        };

        match marked {
            Ok(()) => {
                self.core.record_abort(AbortKind::Run);
                Ok(())
            }
            Err(err) => Err(self
                .core
                .fail_callback(
                    locations::STREAM_RUN_ABORT,
                    "Error while aborting run!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    /// Keep the queue message invisible for another `seconds`. A no-op when
    /// the invocation did not come from a queue message.
    pub async fn set_message_visibility_timeout(&self, seconds: i32) -> Result<(), ProcessorError> {
        let Some(lease) = &self.lease else {
            debug!(
                stream_id = %self.stream.id,
                seconds,
                "No message lease to extend"
            );
            return Ok(());
        };

        lease.extend(seconds).await.map_err(|err| ProcessorError::Failed {
            message: format!("{}: {err}", locations::SET_VISIBILITY_TIMEOUT),
            stack: None,
        })
    }
}

/// Context handed to [`PlatformProcessor::process_data`](super::PlatformProcessor::process_data)
pub struct DataContext {
    core: ContextCore,
    unit: DataUnit,
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("data_id", &self.unit.id)
            .field("stream_id", &self.unit.stream_id)
            .field("scope", &self.core.scope)
            .field("platform", &self.core.platform())
            .finish()
    }
}

impl DataContext {
    pub(crate) fn new(services: WorkerServices, info: &DataProcessingInfo) -> Self {
        Self {
            core: ContextCore::new(
                services,
                info.integration.snapshot(),
                info.data.tenant_id,
                info.data.scope,
                info.onboarding(),
            ),
            unit: info.data.clone(),
        }
    }

    pub fn integration(&self) -> &IntegrationSnapshot {
        &self.core.integration
    }

    pub fn platform(&self) -> &str {
        self.core.platform()
    }

    pub fn tenant_id(&self) -> Uuid {
        self.core.tenant_id
    }

    pub fn onboarding(&self) -> bool {
        self.core.onboarding
    }

    pub fn scope(&self) -> StreamScope {
        self.core.scope
    }

    pub fn data_id(&self) -> Uuid {
        self.unit.id
    }

    pub fn stream_id(&self) -> Uuid {
        self.unit.stream_id
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.unit.data
    }

    pub fn cache(&self) -> &NamespacedCache {
        &self.core.cache
    }

    /// Shared by every tenant and platform
    pub fn global_cache(&self) -> &NamespacedCache {
        &self.core.global_cache
    }

    pub fn integration_cache(&self) -> &NamespacedCache {
        &self.core.integration_cache
    }

    /// Fixed-window limiter counted in the global cache under `counter_key`
    pub fn get_rate_limiter(
        &self,
        max_requests: u32,
        window_seconds: u64,
        counter_key: &str,
    ) -> RateLimiter {
        self.core.rate_limiter(max_requests, window_seconds, counter_key)
    }

    pub fn get_concurrent_request_limiter(
        &self,
        max_concurrent: u32,
        counter_key: &str,
    ) -> ConcurrentRequestLimiter {
        self.core.concurrent_request_limiter(max_concurrent, counter_key)
    }

    pub(crate) fn aborted(&self) -> Option<AbortKind> {
        self.core.aborted()
    }

    /// Publish a canonical activity; its `source_id` is the sink's dedup key
    pub async fn publish_activity(&self, activity: ActivityData) -> Result<Uuid, ProcessorError> {
        let natural_key = activity.source_id.clone();
        let data = match serde_json::to_value(&activity) {
            Ok(data) => data,
            Err(err) => {
                return Err(self
                    .core
                    .fail_callback(
                        locations::PUBLISH_RESULT,
                        "Error while publishing activity!",
                        error_codes::CALLBACK_FAILURE,
                        err,
                    )
                    .await)
            }
        };
        self.publish_result(ResultType::Activity, data, Some(natural_key))
            .await
    }

    /// Publish a non-activity entity; the result id is used as the dedup key
    pub async fn publish_custom(
        &self,
        entity: serde_json::Value,
        result_type: ResultType,
    ) -> Result<Uuid, ProcessorError> {
        self.publish_result(result_type, entity, None).await
    }

    async fn publish_result(
        &self,
        result_type: ResultType,
        data: serde_json::Value,
        natural_key: Option<String>,
    ) -> Result<Uuid, ProcessorError> {
        let result = NewIntegrationResult {
            result_type,
            data,
            data_id: self.unit.id,
            onboarding: self.core.onboarding,
        };

        let published = async {
            let result_id = self
                .core
                .services
                .store
                .publish_result(&self.unit, &result)
                .await?;
            let natural_key = natural_key.unwrap_or_else(|| result_id.to_string());
            self.core
                .services
                .sink_emitter
                .trigger_result_processing(
                    self.core.tenant_id,
                    self.platform(),
                    result_id,
                    &natural_key,
                    self.core.onboarding,
                )
                .await?;
            crate::error::Result::Ok(result_id)
        }
        .await;

        match published {
            Ok(result_id) => Ok(result_id),
            Err(err) => Err(self
                .core
                .fail_callback(
                    locations::PUBLISH_RESULT,
                    "Error while publishing result!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    /// Request a stream in the same run or webhook as the originating unit;
    /// the unit's stream becomes its parent
    pub async fn publish_stream(
        &self,
        identifier: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Result<Option<Uuid>, ProcessorError> {
        self.core
            .publish_child(self.unit.stream_id, self.unit.integration_id, identifier.into(), data)
            .await
    }

    pub async fn update_integration_settings(
        &self,
        settings: &serde_json::Value,
    ) -> Result<(), ProcessorError> {
        self.core.update_integration_settings(settings).await
    }

    pub async fn update_integration_token(&self, token: &str) -> Result<(), ProcessorError> {
        self.core.update_integration_token(token).await
    }

    pub async fn update_integration_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<(), ProcessorError> {
        self.core.update_integration_refresh_token(refresh_token).await
    }

    /// Fail this data unit without retry
    pub async fn abort_with_error(
        &self,
        message: &str,
        metadata: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), ProcessorError> {
        let structured = abort_payload(locations::DATA_ABORT, message, metadata, error);
        warn!(data_id = %self.unit.id, platform = %self.platform(), "{message}");

        match self
            .core
            .services
            .store
            .mark_data_error(self.unit.id, &structured)
            .await
        {
            Ok(()) => {
                self.core.record_abort(AbortKind::Unit);
                Ok(())
            }
            Err(err) => Err(self
                .core
                .fail_callback(
                    locations::DATA_ABORT,
                    "Error while aborting data unit!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }

    /// Stop the whole run, leaving this unit untouched. For webhook-originated
    /// data the webhook and the unit are marked ERROR instead.
    pub async fn abort_run_with_error(
        &self,
        message: &str,
        metadata: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), ProcessorError> {
        let store = &self.core.services.store;
        let structured = abort_payload(locations::DATA_RUN_ABORT, message, metadata, error);

        let marked = match self.core.scope {
            StreamScope::Run { run_id } => {
                info!(run_id = %run_id, data_id = %self.unit.id, "Stopping run: {message}");
                store.mark_run_error(run_id, &structured).await
            }
            StreamScope::Webhook { webhook_id } => {
                warn!(webhook_id = %webhook_id, data_id = %self.unit.id, "{message}");
                match store.mark_webhook_error(webhook_id, &structured).await {
                    Ok(()) => store.mark_data_error(self.unit.id, &structured).await,
                    Err(err) => Err(err),
                }
            }
        };

        match marked {
            Ok(()) => {
                self.core.record_abort(AbortKind::Run);
                Ok(())
            }
            Err(err) => Err(self
                .core
                .fail_callback(
                    locations::DATA_RUN_ABORT,
                    "Error while aborting run!",
                    error_codes::CALLBACK_FAILURE,
                    err,
                )
                .await),
        }
    }
}
