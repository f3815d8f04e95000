use super::stream::StreamScope;
use crate::state_machine::DataUnitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One raw payload produced by a processed stream, awaiting transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUnit {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub scope: StreamScope,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    pub state: DataUnitState,
    pub data: serde_json::Value,
    pub retries: i32,
    pub error: Option<serde_json::Value>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data unit reference used by the delayed data resetter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessableData {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: String,
}
