//! Seeded in-memory world shared by the integration tests.

use chrono::{DateTime, Utc};
use integration_stream::cache::MemoryCache;
use integration_stream::config::WorkerConfig;
use integration_stream::database::InMemoryStreamStore;
use integration_stream::messaging::RecordingEmitter;
use integration_stream::models::{
    DataUnit, IncomingWebhook, Integration, IntegrationRun, IntegrationStream, StreamScope,
};
use integration_stream::orchestration::{
    DataTransformer, PlatformProcessor, StreamMaintenance, StreamOrchestrator, WorkerServices,
};
use integration_stream::registry::ProcessorRegistry;
use integration_stream::state_machine::{DataUnitState, RunState, StreamState, WebhookState};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub const PLATFORM: &str = "test-platform";

pub struct TestWorld {
    pub store: Arc<InMemoryStreamStore>,
    pub emitter: Arc<RecordingEmitter>,
    pub cache: Arc<MemoryCache>,
    pub registry: Arc<ProcessorRegistry>,
    pub config: WorkerConfig,
    pub tenant_id: Uuid,
    pub integration: Integration,
    pub run: IntegrationRun,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    pub fn with_config(config: WorkerConfig) -> Self {
        let store = Arc::new(InMemoryStreamStore::new());
        let tenant_id = Uuid::new_v4();
        let integration = Integration {
            id: Uuid::new_v4(),
            tenant_id,
            platform: PLATFORM.to_string(),
            status: "done".to_string(),
            integration_identifier: Some("guild-1".to_string()),
            settings: json!({"channels": ["general"], "cursor": null}),
            token: Some("token-1".to_string()),
            refresh_token: None,
        };
        let run = IntegrationRun {
            id: Uuid::new_v4(),
            tenant_id,
            integration_id: integration.id,
            state: RunState::Processing,
            onboarding: true,
            delayed_until: None,
            error: None,
            updated_at: Utc::now() - chrono::Duration::hours(1),
        };
        store.insert_integration(integration.clone());
        store.insert_run(run.clone());

        Self {
            store,
            emitter: Arc::new(RecordingEmitter::new()),
            cache: Arc::new(MemoryCache::new()),
            registry: Arc::new(ProcessorRegistry::new()),
            config,
            tenant_id,
            integration,
            run,
        }
    }

    pub fn services(&self) -> WorkerServices {
        WorkerServices::with_emitter(
            self.store.clone(),
            self.emitter.clone(),
            self.cache.clone(),
            self.registry.clone(),
            Arc::new(self.config.clone()),
        )
    }

    pub fn orchestrator(&self) -> StreamOrchestrator {
        StreamOrchestrator::new(self.services())
    }

    pub fn transformer(&self) -> DataTransformer {
        DataTransformer::new(self.services())
    }

    pub fn maintenance(&self) -> StreamMaintenance {
        StreamMaintenance::new(self.services())
    }

    pub fn register(&self, processor: Arc<dyn PlatformProcessor>) {
        self.registry
            .register(processor)
            .expect("processor registers once per world");
    }

    pub fn set_run_state(&self, state: RunState) {
        let mut run = self.current_run();
        run.state = state;
        self.store.insert_run(run);
    }

    pub fn set_integration_status(&self, status: &str) {
        let mut integration = self.integration.clone();
        integration.status = status.to_string();
        self.store.insert_integration(integration);
    }

    pub fn current_run(&self) -> IntegrationRun {
        self.store.run(self.run.id).expect("seeded run exists")
    }

    pub fn current_stream(&self, stream_id: Uuid) -> IntegrationStream {
        self.store.stream(stream_id).expect("stream exists")
    }

    pub fn current_data(&self, data_id: Uuid) -> DataUnit {
        self.store.data_unit(data_id).expect("data unit exists")
    }

    pub fn run_scope(&self) -> StreamScope {
        StreamScope::Run { run_id: self.run.id }
    }

    pub fn stream_in(&self, scope: StreamScope, identifier: &str) -> IntegrationStream {
        let now = Utc::now();
        IntegrationStream {
            id: Uuid::new_v4(),
            parent_id: None,
            scope,
            tenant_id: self.tenant_id,
            integration_id: self.integration.id,
            identifier: identifier.to_string(),
            state: StreamState::Pending,
            data: Some(json!({"page": 1})),
            retries: 0,
            error: None,
            delayed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seed a PENDING root stream of the run
    pub fn seed_stream(&self, identifier: &str, retries: i32) -> IntegrationStream {
        let mut stream = self.stream_in(self.run_scope(), identifier);
        stream.retries = retries;
        self.store.insert_stream(stream.clone());
        stream
    }

    pub fn seed_stream_in_state(
        &self,
        identifier: &str,
        state: StreamState,
        delayed_until: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> IntegrationStream {
        let mut stream = self.stream_in(self.run_scope(), identifier);
        stream.state = state;
        stream.delayed_until = delayed_until;
        stream.updated_at = updated_at;
        self.store.insert_stream(stream.clone());
        stream
    }

    /// Seed a PENDING data unit produced by `stream`
    pub fn seed_data_unit(&self, stream: &IntegrationStream, retries: i32) -> DataUnit {
        let now = Utc::now();
        let unit = DataUnit {
            id: Uuid::new_v4(),
            stream_id: stream.id,
            scope: stream.scope,
            tenant_id: self.tenant_id,
            integration_id: self.integration.id,
            state: DataUnitState::Pending,
            data: json!({"id": "msg-1", "content": "hello"}),
            retries,
            error: None,
            delayed_until: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_data_unit(unit.clone());
        unit
    }

    pub fn seed_webhook(&self) -> IncomingWebhook {
        let webhook = IncomingWebhook {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            integration_id: self.integration.id,
            webhook_type: "MESSAGE_CREATED".to_string(),
            state: WebhookState::Pending,
            payload: json!({"event": "message", "id": "msg-9"}),
            error: None,
            created_at: Utc::now(),
        };
        self.store.insert_webhook(webhook.clone());
        webhook
    }
}

/// Assert `actual` lies within `tolerance_secs` of `now + offset_secs`
pub fn assert_about_from_now(actual: Option<DateTime<Utc>>, offset_secs: i64, tolerance_secs: i64) {
    let actual = actual.expect("timestamp is set");
    let expected = Utc::now() + chrono::Duration::seconds(offset_secs);
    let drift = (actual - expected).num_seconds().abs();
    assert!(
        drift <= tolerance_secs,
        "expected ~now+{offset_secs}s, got {actual} (drift {drift}s)"
    );
}
