//! Shared collaborators handed to every orchestration component.

use crate::cache::{IntegrationCache, NamespacedCache};
use crate::config::WorkerConfig;
use crate::database::StreamStore;
use crate::messaging::{DataSinkEmitter, DataWorkerEmitter, RunWorkerEmitter, StreamWorkerEmitter};
use crate::registry::ProcessorRegistry;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct WorkerServices {
    pub store: Arc<dyn StreamStore>,
    pub stream_emitter: Arc<dyn StreamWorkerEmitter>,
    pub data_emitter: Arc<dyn DataWorkerEmitter>,
    pub run_emitter: Arc<dyn RunWorkerEmitter>,
    pub sink_emitter: Arc<dyn DataSinkEmitter>,
    pub cache: Arc<dyn IntegrationCache>,
    pub registry: Arc<ProcessorRegistry>,
    pub config: Arc<WorkerConfig>,
}

impl std::fmt::Debug for WorkerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerServices")
            .field("registry", &self.registry)
            .field("cache", &self.cache.provider_name())
            .finish()
    }
}

impl WorkerServices {
    /// Wire every emitter role to the same emitter
    pub fn with_emitter<E>(
        store: Arc<dyn StreamStore>,
        emitter: Arc<E>,
        cache: Arc<dyn IntegrationCache>,
        registry: Arc<ProcessorRegistry>,
        config: Arc<WorkerConfig>,
    ) -> Self
    where
        E: StreamWorkerEmitter + DataWorkerEmitter + RunWorkerEmitter + DataSinkEmitter + 'static,
    {
        Self {
            store,
            stream_emitter: emitter.clone(),
            data_emitter: emitter.clone(),
            run_emitter: emitter.clone(),
            sink_emitter: emitter,
            cache,
            registry,
            config,
        }
    }

    pub(crate) fn namespaced_cache(&self, tenant_id: Uuid, platform: &str) -> NamespacedCache {
        NamespacedCache::new(
            self.cache.clone(),
            tenant_id,
            platform,
            self.config.cache_ttl(),
        )
    }

    pub(crate) fn global_cache(&self) -> NamespacedCache {
        NamespacedCache::global(self.cache.clone(), self.config.cache_ttl())
    }

    pub(crate) fn integration_cache(&self, integration_id: Uuid) -> NamespacedCache {
        NamespacedCache::for_integration(self.cache.clone(), integration_id, self.config.cache_ttl())
    }
}
