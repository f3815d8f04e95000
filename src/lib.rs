#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Integration Stream Core
//!
//! Orchestration engine for ingesting activity data from external platforms.
//! Each platform plugs in a [`PlatformProcessor`](orchestration::PlatformProcessor);
//! this crate owns everything around it: claiming units of work, tracking their
//! state, retrying failures, pausing runs on rate limits, fanning out follow-up
//! work and handing canonical results to the data sink.
//!
//! ## Pipeline
//!
//! ```text
//! PROCESS_STREAM ──▶ StreamOrchestrator ──▶ process_stream ──┬─▶ child streams ──▶ stream queue
//!                                                            └─▶ data units ─────▶ data queue
//! PROCESS_DATA ────▶ DataTransformer ────▶ process_data ─────┬─▶ results ────────▶ data sink
//!                                                            └─▶ streams ────────▶ stream queue
//! ```
//!
//! Both stages share the execution contexts, the error taxonomy and the
//! retry/backoff policy in [`orchestration::retry_policy`].
//!
//! ## Module Organization
//!
//! - [`config`] - layered worker configuration
//! - [`constants`] - error locations, codes, queue names
//! - [`error`] - crate error type
//! - [`logging`] - structured logging setup
//! - [`models`] - integration, run, stream, data unit, result and webhook rows
//! - [`state_machine`] - unit states and transition tables
//! - [`database`] - the [`StreamStore`](database::StreamStore) contract, Postgres and in-memory stores
//! - [`cache`] - advisory processor cache
//! - [`messaging`] - queue transport, worker messages, emitters
//! - [`registry`] - platform → processor registry
//! - [`orchestration`] - stream and data stages, maintenance sweeps, worker loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integration_stream::cache::MemoryCache;
//! use integration_stream::config::WorkerConfig;
//! use integration_stream::database::InMemoryStreamStore;
//! use integration_stream::messaging::{InMemoryTransport, RecordingEmitter};
//! use integration_stream::orchestration::{StreamWorker, WorkerServices};
//! use integration_stream::registry::ProcessorRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let services = WorkerServices::with_emitter(
//!     Arc::new(InMemoryStreamStore::new()),
//!     Arc::new(RecordingEmitter::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(ProcessorRegistry::new()),
//!     Arc::new(WorkerConfig::default()),
//! );
//! let worker = StreamWorker::new(services, Arc::new(InMemoryTransport::new()));
//! worker.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;

pub use config::{QueueConfig, WorkerConfig};
pub use error::{IntegrationStreamError, Result};
pub use orchestration::{
    DataContext, DataTransformer, PlatformProcessor, ProcessorError, StreamContext,
    StreamOrchestrator, StreamWorker, WorkerServices,
};
pub use registry::ProcessorRegistry;
