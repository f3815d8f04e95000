//! # Orchestration
//!
//! The two-stage pipeline and everything it shares:
//!
//! - [`processor`] - the [`PlatformProcessor`] plug-in interface and [`ProcessorError`]
//! - [`context`] - per-invocation [`StreamContext`] / [`DataContext`] callbacks
//! - [`retry_policy`] - failure classification and linear backoff
//! - [`limiter`] - shared rate and concurrent-request limiters for processors
//! - [`stream_orchestrator`] - the stream stage
//! - [`data_transformer`] - the data stage
//! - [`maintenance`] - delayed/stale resetters and run stream re-emission
//! - [`worker`] - the queue consumer tying it together

pub mod context;
pub mod data_transformer;
pub mod limiter;
pub mod maintenance;
pub mod outcome;
pub mod processor;
pub mod retry_policy;
pub mod services;
pub mod stream_orchestrator;
pub mod worker;

pub use context::{AbortKind, DataContext, StreamContext};
pub use data_transformer::DataTransformer;
pub use limiter::{ConcurrentRequestLimiter, RateLimiter};
pub use maintenance::{MaintenanceReport, StreamMaintenance};
pub use outcome::{InvocationOutcome, SkipReason};
pub use processor::{PlatformProcessor, ProcessorError};
pub use retry_policy::{FailedUnit, FailureOutcome, RetryPolicy, UnitKind};
pub use services::WorkerServices;
pub use stream_orchestrator::StreamOrchestrator;
pub use worker::{HandledMessage, StreamWorker};
