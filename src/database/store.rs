//! # Stream Store Contract
//!
//! Every read and write the stream and data stages perform against durable
//! storage. Implementations must make each per-row state transition atomic and
//! report a transition that did not touch exactly one row as
//! [`IntegrationStreamError::UnexpectedRowCount`](crate::error::IntegrationStreamError::UnexpectedRowCount),
//! since that means the unit was mutated concurrently.
//!
//! Child stream creation relies on the uniqueness of `(run_id, identifier)`
//! and `(webhook_id, identifier)`: inserting a duplicate is a no-op reported
//! as [`ChildStreamInsert::Duplicate`], whether or not the run is at its
//! stream cap.

use crate::error::Result;
use crate::models::{
    ChildStreamInsert, DataProcessingInfo, DataUnit, IncomingWebhook, IntegrationRun, IntegrationStream,
    NewIntegrationResult, NewStream, ProcessableData, ProcessableStream, StreamProcessingInfo,
    StructuredError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait StreamStore: Send + Sync {
    // Lookups

    /// Stream joined with its integration and run
    async fn get_stream_info(&self, stream_id: Uuid) -> Result<Option<StreamProcessingInfo>>;

    /// Data unit joined with its integration and run
    async fn get_data_info(&self, data_id: Uuid) -> Result<Option<DataProcessingInfo>>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<IntegrationRun>>;

    async fn get_webhook(&self, webhook_id: Uuid) -> Result<Option<IncomingWebhook>>;

    async fn get_stream_id_by_webhook_id(&self, webhook_id: Uuid) -> Result<Option<Uuid>>;

    // Unit creation

    async fn create_webhook(
        &self,
        tenant_id: Uuid,
        integration_id: Uuid,
        webhook_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid>;

    /// Root stream for a webhook; its identifier is the webhook id
    async fn publish_webhook_stream(&self, webhook: &IncomingWebhook) -> Result<Uuid>;

    /// Insert a PENDING child stream. For run scope with `max_streams_per_run`
    /// set, the duplicate check, the count and the insert happen atomically
    /// per run, so concurrent publishers cannot overshoot the cap.
    async fn publish_child_stream(
        &self,
        stream: &NewStream,
        max_streams_per_run: Option<i64>,
    ) -> Result<ChildStreamInsert>;

    /// Insert a PENDING data unit produced by `stream`, inheriting its scope
    async fn publish_data(&self, stream: &IntegrationStream, data: serde_json::Value)
        -> Result<Uuid>;

    async fn publish_result(&self, unit: &DataUnit, result: &NewIntegrationResult) -> Result<Uuid>;

    // Stream transitions

    async fn mark_stream_processing(&self, stream_id: Uuid) -> Result<()>;

    async fn mark_stream_processed(&self, stream_id: Uuid) -> Result<()>;

    /// Record the error and increment `retries`
    async fn mark_stream_error(&self, stream_id: Uuid, error: &StructuredError) -> Result<()>;

    async fn delay_stream(&self, stream_id: Uuid, until: DateTime<Utc>) -> Result<()>;

    /// Back to PENDING without touching `retries`
    async fn reset_stream(&self, stream_id: Uuid) -> Result<()>;

    async fn delete_stream(&self, stream_id: Uuid) -> Result<()>;

    // Data unit transitions

    async fn mark_data_processed(&self, data_id: Uuid) -> Result<()>;

    /// Record the error and increment `retries`
    async fn mark_data_error(&self, data_id: Uuid, error: &StructuredError) -> Result<()>;

    /// PENDING to PROCESSING. `Ok(false)` when another delivery got there
    /// first or the unit is gone.
    async fn claim_data(&self, data_id: Uuid) -> Result<bool>;

    async fn delay_data(&self, data_id: Uuid, until: DateTime<Utc>) -> Result<()>;

    async fn reset_data(&self, data_id: Uuid) -> Result<()>;

    // Run

    /// Heartbeat
    async fn touch_run(&self, run_id: Uuid) -> Result<()>;

    async fn mark_run_error(&self, run_id: Uuid, error: &StructuredError) -> Result<()>;

    /// Pause an active run. `Ok(false)` when the run is already stopped
    /// (ERROR or integration deleted), which is left untouched.
    async fn delay_run(&self, run_id: Uuid, until: DateTime<Utc>) -> Result<bool>;

    // Webhook

    async fn mark_webhook_processed(&self, webhook_id: Uuid) -> Result<()>;

    async fn mark_webhook_error(&self, webhook_id: Uuid, error: &StructuredError) -> Result<()>;

    async fn delete_webhook(&self, webhook_id: Uuid) -> Result<()>;

    // Integration

    /// Shallow-merge `settings` into the stored settings in one atomic update
    async fn update_integration_settings(
        &self,
        integration_id: Uuid,
        settings: &serde_json::Value,
    ) -> Result<()>;

    async fn update_integration_token(&self, integration_id: Uuid, token: &str) -> Result<()>;

    async fn update_integration_refresh_token(
        &self,
        integration_id: Uuid,
        refresh_token: &str,
    ) -> Result<()>;

    // Maintenance paging

    /// DELAYED streams whose `delayed_until` has passed
    async fn get_ready_delayed_streams(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>>;

    /// DELAYED data units whose `delayed_until` has passed
    async fn get_ready_delayed_data(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>>;

    /// PENDING streams of a run, ordered by id, strictly after `after`
    async fn get_pending_run_streams(
        &self,
        run_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>>;

    /// PENDING data units of a run, ordered by id, strictly after `after`
    async fn get_pending_run_data(
        &self,
        run_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>>;

    /// PROCESSING streams last updated before `older_than`, excluding streams
    /// of stopped runs
    async fn get_stale_processing_streams(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>>;

    /// PROCESSING data units last updated before `older_than`, excluding
    /// units of stopped runs
    async fn get_stale_processing_data(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>>;
}
