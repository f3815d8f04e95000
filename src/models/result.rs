use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Canonical type of a published result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultType {
    Activity,
    Member,
    Organization,
    /// Any other declared canonical type
    Custom(String),
}

impl ResultType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Activity => "activity",
            Self::Member => "member",
            Self::Organization => "organization",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResultType {
    fn from(s: &str) -> Self {
        match s {
            "activity" => Self::Activity,
            "member" => Self::Member,
            "organization" => Self::Organization,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Serialize for ResultType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResultType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value.as_str()))
    }
}

/// Canonical activity produced by a platform processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityData {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub timestamp: DateTime<Utc>,
    /// Natural key of the activity on its platform, used as the sink dedup key
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub member: serde_json::Value,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Result row as persisted for the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub id: Uuid,
    pub result_type: ResultType,
    pub data: serde_json::Value,
    pub stream_id: Uuid,
    pub data_id: Uuid,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    pub onboarding: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewIntegrationResult {
    pub result_type: ResultType,
    pub data: serde_json::Value,
    pub data_id: Uuid,
    pub onboarding: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_type_string_forms() {
        assert_eq!(ResultType::from("activity"), ResultType::Activity);
        assert_eq!(
            ResultType::from("twitter_profile"),
            ResultType::Custom("twitter_profile".to_string())
        );
        assert_eq!(
            serde_json::to_string(&ResultType::Organization).unwrap(),
            "\"organization\""
        );
    }

    #[test]
    fn test_activity_wire_format() {
        let activity: ActivityData = serde_json::from_value(serde_json::json!({
            "type": "message",
            "timestamp": "2024-01-01T00:00:00Z",
            "sourceId": "msg-1",
            "channel": "general"
        }))
        .unwrap();
        assert_eq!(activity.source_id, "msg-1");
        assert_eq!(activity.channel.as_deref(), Some("general"));
        assert!(activity.member.is_null());
    }
}
