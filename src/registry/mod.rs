//! # Registry Infrastructure
//!
//! Maps a platform type to the [`PlatformProcessor`](crate::orchestration::PlatformProcessor)
//! that fetches and transforms its data. Lookups happen per invocation, so a
//! missing processor fails the unit rather than the worker process.

pub mod processor_registry;

pub use processor_registry::{ProcessorRegistry, RegistryStats};
