//! What a single stream or data invocation ended up doing.

use super::context::AbortKind;
use super::retry_policy::FailureOutcome;
use serde::Serialize;

/// Why a unit was not handed to its processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "state", rename_all = "snake_case")]
pub enum SkipReason {
    /// The owning run is paused by a rate limit
    RunDelayed,
    /// The owning run's integration was deleted
    RunDeleted,
    /// The owning run is in ERROR
    RunStopped,
    NeedsReconnect,
    /// Already claimed or finished by another delivery
    NotPending(String),
    /// Lost the claim to a concurrent delivery of the same unit
    AlreadyClaimed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The unit no longer exists
    NotFound,
    Skipped(SkipReason),
    Processed,
    /// The processor called an abort callback; no further transition applied
    Aborted(AbortKind),
    Failed(FailureOutcome),
}

impl InvocationOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Skipped(_) => "skipped",
            Self::Processed => "processed",
            Self::Aborted(_) => "aborted",
            Self::Failed(_) => "failed",
        }
    }
}
