use crate::constants::system;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured connection to one external platform for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: String,
    pub status: String,
    pub integration_identifier: Option<String>,
    pub settings: serde_json::Value,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Integration {
    pub fn needs_reconnect(&self) -> bool {
        self.status == system::INTEGRATION_NEEDS_RECONNECT
    }

    /// Snapshot handed to processors; processors never mutate the integration
    /// directly, only through context callbacks.
    pub fn snapshot(&self) -> IntegrationSnapshot {
        IntegrationSnapshot {
            id: self.id,
            identifier: self.integration_identifier.clone(),
            platform: self.platform.clone(),
            status: self.status.clone(),
            settings: self.settings.clone(),
            token: self.token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSnapshot {
    pub id: Uuid,
    pub identifier: Option<String>,
    pub platform: String,
    pub status: String,
    pub settings: serde_json::Value,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Shallow merge of `patch` into `current`: top-level keys of `patch` replace
/// those of `current`. A non-object on either side yields `patch`.
pub fn merge_settings(current: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (current, patch) {
        (serde_json::Value::Object(current), serde_json::Value::Object(patch)) => {
            let mut merged = current.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}
