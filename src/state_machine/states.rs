use serde::{Deserialize, Serialize};
use std::fmt;

/// Stream unit states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Waiting to be claimed
    #[default]
    Pending,
    /// Claimed by a worker and being processed
    Processing,
    /// Processed successfully
    Processed,
    /// Failed; may have been delayed for retry afterwards
    Error,
    /// Waiting for `delayed_until` before becoming eligible again
    Delayed,
}

impl StreamState {
    pub const ALL: [StreamState; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Processed,
        Self::Error,
        Self::Delayed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed)
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Error => "error",
            Self::Delayed => "delayed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            "delayed" => Ok(Self::Delayed),
            _ => Err(format!("Invalid stream state: {s}")),
        }
    }
}

/// Raw API data unit states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataUnitState {
    #[default]
    Pending,
    /// Claimed by one delivery; redeliveries of the same unit are skipped
    Processing,
    Processed,
    Error,
    Delayed,
}

impl DataUnitState {
    pub const ALL: [DataUnitState; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Processed,
        Self::Error,
        Self::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Error => "error",
            Self::Delayed => "delayed",
        }
    }
}

impl fmt::Display for DataUnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataUnitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            "delayed" => Ok(Self::Delayed),
            _ => Err(format!("Invalid data unit state: {s}")),
        }
    }
}

/// Integration run states. A run with no explicit terminal state is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Processing,
    Delayed,
    Processed,
    Error,
    IntegrationDeleted,
}

impl RunState {
    /// Stopped runs never resume on their own
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Error | Self::IntegrationDeleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delayed => "delayed",
            Self::Processed => "processed",
            Self::Error => "error",
            Self::IntegrationDeleted => "integration_deleted",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "delayed" => Ok(Self::Delayed),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            "integration_deleted" => Ok(Self::IntegrationDeleted),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookState {
    #[default]
    Pending,
    Processed,
    Error,
}

impl WebhookState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for WebhookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WebhookState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid webhook state: {s}")),
        }
    }
}
