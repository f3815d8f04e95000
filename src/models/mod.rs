//! # Data Model
//!
//! Integration, run, stream, data unit, result and webhook rows, plus the
//! joined "processing info" rows the orchestrators load before invoking a
//! platform processor.

pub mod data_unit;
pub mod integration;
pub mod result;
pub mod run;
pub mod stream;
pub mod structured_error;
pub mod webhook;

pub use data_unit::{DataUnit, ProcessableData};
pub use integration::{merge_settings, Integration, IntegrationSnapshot};
pub use result::{ActivityData, IntegrationResult, NewIntegrationResult, ResultType};
pub use run::IntegrationRun;
pub use stream::{
    ChildStreamInsert, IntegrationStream, NewStream, ProcessableStream, StreamScope, StreamType,
};
pub use structured_error::StructuredError;
pub use webhook::IncomingWebhook;

use crate::state_machine::RunState;
use serde::{Deserialize, Serialize};

/// Run columns joined onto a stream or data unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: uuid::Uuid,
    pub state: RunState,
    pub onboarding: bool,
}

/// Stream joined with its integration and (for run-scoped streams) its run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProcessingInfo {
    pub stream: IntegrationStream,
    pub integration: Integration,
    pub run: Option<RunSnapshot>,
}

impl StreamProcessingInfo {
    pub fn onboarding(&self) -> bool {
        self.run.as_ref().map(|run| run.onboarding).unwrap_or(false)
    }
}

/// Data unit joined with its integration and (for run-scoped units) its run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProcessingInfo {
    pub data: DataUnit,
    pub integration: Integration,
    pub run: Option<RunSnapshot>,
}

impl DataProcessingInfo {
    /// Webhook-originated data has no run and is treated as onboarding
    pub fn onboarding(&self) -> bool {
        self.run.as_ref().map(|run| run.onboarding).unwrap_or(true)
    }
}
