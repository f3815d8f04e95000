//! # Processor Registry
//!
//! Thread-safe platform → processor map shared by the stream and data stages.
//!
//! ## Usage
//!
//! ```rust
//! use integration_stream::registry::ProcessorRegistry;
//!
//! let registry = ProcessorRegistry::new();
//! assert!(registry.get("slack").is_none());
//! assert!(registry.platforms().is_empty());
//! ```

use crate::error::{IntegrationStreamError, Result};
use crate::orchestration::processor::PlatformProcessor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry statistics
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStats {
    pub total_processors: usize,
    pub platforms: Vec<String>,
}

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn PlatformProcessor>>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its own platform type. Registering a
    /// second processor for the same platform is rejected.
    pub fn register(&self, processor: Arc<dyn PlatformProcessor>) -> Result<()> {
        let platform = processor.platform().to_string();
        let mut processors = self.processors.write();

        if processors.contains_key(&platform) {
            return Err(IntegrationStreamError::ValidationError(format!(
                "Processor already registered for platform '{platform}'"
            )));
        }

        info!(platform = %platform, "Registered platform processor");
        processors.insert(platform, processor);
        Ok(())
    }

    /// Replace (or add) the processor for its platform, returning the previous one
    pub fn replace(&self, processor: Arc<dyn PlatformProcessor>) -> Option<Arc<dyn PlatformProcessor>> {
        let platform = processor.platform().to_string();
        debug!(platform = %platform, "Replacing platform processor");
        self.processors.write().insert(platform, processor)
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn PlatformProcessor>> {
        self.processors.read().get(platform).cloned()
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.processors.read().contains_key(platform)
    }

    /// Registered platform types, sorted
    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.processors.read().keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn stats(&self) -> RegistryStats {
        let platforms = self.platforms();
        RegistryStats {
            total_processors: platforms.len(),
            platforms,
        }
    }
}
