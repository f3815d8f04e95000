use serde::{Deserialize, Serialize};

/// Events that move a unit (stream or data unit) through its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitEvent {
    /// Claim the unit for processing
    Start,
    /// Processor returned successfully
    Complete,
    /// Record a structured error
    Fail,
    /// Park the unit until `delayed_until`
    Delay,
    /// Put the unit back to pending (rate limit, resetter, reconciler)
    Reset,
}

impl UnitEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Delay => "delay",
            Self::Reset => "reset",
        }
    }
}
