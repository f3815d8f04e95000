use crate::constants::error_codes;
use crate::error::{IntegrationStreamError, Result};
use crate::state_machine::StreamState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner of a stream or data unit: either an integration run or an incoming
/// webhook, never both and never neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum StreamScope {
    Run { run_id: Uuid },
    Webhook { webhook_id: Uuid },
}

impl StreamScope {
    /// Build a scope from the two nullable storage columns
    pub fn from_columns(run_id: Option<Uuid>, webhook_id: Option<Uuid>) -> Result<Self> {
        match (run_id, webhook_id) {
            (Some(run_id), None) => Ok(Self::Run { run_id }),
            (None, Some(webhook_id)) => Ok(Self::Webhook { webhook_id }),
            (run_id, webhook_id) => Err(IntegrationStreamError::contract_violation(
                error_codes::INVALID_SCOPE,
                format!(
                    "Exactly one of run id and webhook id must be set (run: {run_id:?}, webhook: {webhook_id:?})"
                ),
            )),
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Run { run_id } => Some(*run_id),
            Self::Webhook { .. } => None,
        }
    }

    pub fn webhook_id(&self) -> Option<Uuid> {
        match self {
            Self::Webhook { webhook_id } => Some(*webhook_id),
            Self::Run { .. } => None,
        }
    }
}

/// Whether a stream was created by the run owner or by another stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Root,
    Child,
}

impl StreamType {
    pub fn from_parent(parent_id: Option<Uuid>) -> Self {
        if parent_id.is_some() {
            Self::Child
        } else {
            Self::Root
        }
    }
}

/// One unit of paginated fetch work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationStream {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub scope: StreamScope,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    /// Unique within the owning run or webhook
    pub identifier: String,
    pub state: StreamState,
    pub data: Option<serde_json::Value>,
    pub retries: i32,
    pub error: Option<serde_json::Value>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationStream {
    pub fn stream_type(&self) -> StreamType {
        StreamType::from_parent(self.parent_id)
    }

    pub fn is_ready_for_retry(&self) -> bool {
        match self.delayed_until {
            Some(until) => Utc::now() >= until,
            None => true,
        }
    }
}

/// Child stream to insert; `parent_id` is the stream (or the data unit's
/// stream) that requested it
#[derive(Debug, Clone, PartialEq)]
pub struct NewStream {
    pub parent_id: Uuid,
    pub scope: StreamScope,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    pub identifier: String,
    pub data: Option<serde_json::Value>,
}

/// What inserting a child stream did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStreamInsert {
    Inserted(Uuid),
    /// A stream with the same scope and identifier already exists
    Duplicate,
    /// The run already holds `count` streams and the identifier is new
    CapReached { count: i64 },
}

/// Stream reference used by the resetter and the run continuation paging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessableStream {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: String,
    pub scope: StreamScope,
    pub onboarding: Option<bool>,
}
