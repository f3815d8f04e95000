//! # Messaging
//!
//! Queue transport, worker message payloads and the emitters that notify
//! collaborating workers.
//!
//! - [`transport`] - the [`QueueTransport`] trait, pgmq over sqlx, and an
//!   in-process transport
//! - [`message`] - incoming [`WorkerMessage`]s and outgoing collaborator
//!   messages
//! - [`emitter`] - one trait per collaborator plus the queue-backed
//!   [`QueueEmitter`]
//! - [`recording`] - [`RecordingEmitter`] for tests and dry runs

pub mod emitter;
pub mod errors;
pub mod message;
pub mod recording;
pub mod transport;

pub use emitter::{
    DataSinkEmitter, DataWorkerEmitter, Notification, QueueEmitter, RunWorkerEmitter,
    StreamWorkerEmitter,
};
pub use errors::{MessagingError, MessagingResult};
pub use message::{DataSinkMessage, RunWorkerMessage, WorkerMessage};
pub use recording::RecordingEmitter;
pub use transport::{InMemoryTransport, MessageLease, PgmqTransport, QueueMessage, QueueTransport};
