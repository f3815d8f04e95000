use crate::state_machine::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One execution pass of an integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    pub state: RunState,
    pub onboarding: bool,
    pub delayed_until: Option<DateTime<Utc>>,
    pub error: Option<serde_json::Value>,
    /// Heartbeat, touched on every stream invocation
    pub updated_at: DateTime<Utc>,
}

impl IntegrationRun {
    pub fn is_delayed(&self) -> bool {
        self.state == RunState::Delayed
    }
}
