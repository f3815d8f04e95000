//! Queue message payloads consumed and produced by the stream worker.

use super::errors::{MessagingError, MessagingResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages the stream worker consumes. The `type` field selects the
/// variant; any other type fails to parse and is a fatal per-message error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WorkerMessage {
    ProcessStream {
        stream_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        onboarding: Option<bool>,
    },
    ProcessWebhookStream {
        webhook_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },
    ProcessData {
        #[serde(rename = "dataUnitId", alias = "dataId")]
        data_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tenant_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },
    /// Reset DELAYED units whose delay has passed
    CheckStreams,
    /// Re-emit every PENDING stream and data unit of a run
    ContinueProcessingRunStreams { run_id: Uuid },
}

impl WorkerMessage {
    pub fn parse(value: &serde_json::Value) -> MessagingResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            MessagingError::message_deserialization(format!("unsupported worker message: {e}"))
        })
    }

    pub fn to_json(&self) -> MessagingResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ProcessStream { .. } => "PROCESS_STREAM",
            Self::ProcessWebhookStream { .. } => "PROCESS_WEBHOOK_STREAM",
            Self::ProcessData { .. } => "PROCESS_DATA",
            Self::CheckStreams => "CHECK_STREAMS",
            Self::ContinueProcessingRunStreams { .. } => "CONTINUE_PROCESSING_RUN_STREAMS",
        }
    }
}

/// Sent to the run owner after every run-scoped stream invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RunWorkerMessage {
    StreamProcessed {
        tenant_id: Uuid,
        platform: String,
        run_id: Uuid,
    },
}

/// Sent to the data sink for every published result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum DataSinkMessage {
    ProcessIntegrationResult {
        tenant_id: Uuid,
        platform: String,
        result_id: Uuid,
        /// Dedup key on the sink side
        natural_key: String,
        onboarding: bool,
    },
}
