//! # In-Memory Stream Store
//!
//! Mirrors [`PgStreamStore`](super::PgStreamStore) semantics under a single
//! `parking_lot` mutex: transitions are validated against the state machines,
//! missing rows surface as `UnexpectedRowCount`, and child streams are
//! deduplicated on `(scope, identifier)`.
//!
//! Tests seed rows through the `insert_*` helpers and can make any named
//! operation fail with [`InMemoryStreamStore::fail_operation`].

use super::store::StreamStore;
use crate::error::{IntegrationStreamError, Result};
use crate::models::{
    merge_settings, ChildStreamInsert, DataProcessingInfo, DataUnit, IncomingWebhook, Integration, IntegrationResult,
    IntegrationRun, IntegrationStream, NewIntegrationResult, NewStream, ProcessableData,
    ProcessableStream, RunSnapshot, StreamProcessingInfo, StreamScope, StructuredError,
};
use crate::state_machine::{
    DataUnitState, DataUnitStateMachine, RunState, StreamState, StreamStateMachine, UnitEvent,
    WebhookState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    integrations: HashMap<Uuid, Integration>,
    runs: HashMap<Uuid, IntegrationRun>,
    streams: HashMap<Uuid, IntegrationStream>,
    data_units: HashMap<Uuid, DataUnit>,
    webhooks: HashMap<Uuid, IncomingWebhook>,
    results: Vec<IntegrationResult>,
    failing: HashSet<String>,
}

impl MemoryState {
    fn check_failure(&self, operation: &str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(IntegrationStreamError::DatabaseError(format!(
                "injected failure in {operation}"
            )));
        }
        Ok(())
    }

    fn stream_mut(&mut self, stream_id: Uuid) -> Result<&mut IntegrationStream> {
        self.streams
            .get_mut(&stream_id)
            .ok_or_else(|| missing_row("stream", stream_id))
    }

    fn data_mut(&mut self, data_id: Uuid) -> Result<&mut DataUnit> {
        self.data_units
            .get_mut(&data_id)
            .ok_or_else(|| missing_row("data unit", data_id))
    }

    fn run_mut(&mut self, run_id: Uuid) -> Result<&mut IntegrationRun> {
        self.runs
            .get_mut(&run_id)
            .ok_or_else(|| missing_row("run", run_id))
    }

    fn webhook_mut(&mut self, webhook_id: Uuid) -> Result<&mut IncomingWebhook> {
        self.webhooks
            .get_mut(&webhook_id)
            .ok_or_else(|| missing_row("webhook", webhook_id))
    }

    fn integration_mut(&mut self, integration_id: Uuid) -> Result<&mut Integration> {
        self.integrations
            .get_mut(&integration_id)
            .ok_or_else(|| missing_row("integration", integration_id))
    }

    fn transition_stream(&mut self, stream_id: Uuid, event: UnitEvent) -> Result<&mut IntegrationStream> {
        let stream = self.stream_mut(stream_id)?;
        stream.state = StreamStateMachine::determine_target_state(stream.state, event)?;
        stream.updated_at = Utc::now();
        Ok(stream)
    }

    fn transition_data(&mut self, data_id: Uuid, event: UnitEvent) -> Result<&mut DataUnit> {
        let unit = self.data_mut(data_id)?;
        unit.state = DataUnitStateMachine::determine_target_state(unit.state, event)?;
        unit.updated_at = Utc::now();
        Ok(unit)
    }

    fn run_snapshot(&self, scope: &StreamScope) -> Option<RunSnapshot> {
        scope
            .run_id()
            .and_then(|run_id| self.runs.get(&run_id))
            .map(|run| RunSnapshot {
                id: run.id,
                state: run.state,
                onboarding: run.onboarding,
            })
    }

    fn processable(&self, stream: &IntegrationStream) -> Option<ProcessableStream> {
        let integration = self.integrations.get(&stream.integration_id)?;
        Some(ProcessableStream {
            id: stream.id,
            tenant_id: stream.tenant_id,
            platform: integration.platform.clone(),
            scope: stream.scope,
            onboarding: self.run_snapshot(&stream.scope).map(|run| run.onboarding),
        })
    }

    fn processable_data(&self, unit: &DataUnit) -> Option<ProcessableData> {
        let integration = self.integrations.get(&unit.integration_id)?;
        Some(ProcessableData {
            id: unit.id,
            tenant_id: unit.tenant_id,
            platform: integration.platform.clone(),
        })
    }

    fn run_in_error(&self, scope: &StreamScope) -> bool {
        self.run_snapshot(scope)
            .map(|run| run.state == RunState::Error)
            .unwrap_or(false)
    }

    fn scope_taken(&self, scope: &StreamScope, identifier: &str) -> bool {
        self.streams
            .values()
            .any(|stream| stream.scope == *scope && stream.identifier == identifier)
    }

    fn insert_stream_row(
        &mut self,
        parent_id: Option<Uuid>,
        scope: StreamScope,
        tenant_id: Uuid,
        integration_id: Uuid,
        identifier: String,
        data: Option<serde_json::Value>,
    ) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.streams.insert(
            id,
            IntegrationStream {
                id,
                parent_id,
                scope,
                tenant_id,
                integration_id,
                identifier,
                state: StreamState::Pending,
                data,
                retries: 0,
                error: None,
                delayed_until: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }
}

fn missing_row(entity: &'static str, id: Uuid) -> IntegrationStreamError {
    IntegrationStreamError::UnexpectedRowCount {
        entity,
        id,
        expected: 1,
        actual: 0,
    }
}

#[derive(Default)]
pub struct InMemoryStreamStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to the named trait method fail
    pub fn fail_operation(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    pub fn insert_integration(&self, integration: Integration) {
        self.state
            .lock()
            .integrations
            .insert(integration.id, integration);
    }

    pub fn insert_run(&self, run: IntegrationRun) {
        self.state.lock().runs.insert(run.id, run);
    }

    pub fn insert_stream(&self, stream: IntegrationStream) {
        self.state.lock().streams.insert(stream.id, stream);
    }

    pub fn insert_data_unit(&self, unit: DataUnit) {
        self.state.lock().data_units.insert(unit.id, unit);
    }

    pub fn insert_webhook(&self, webhook: IncomingWebhook) {
        self.state.lock().webhooks.insert(webhook.id, webhook);
    }

    pub fn stream(&self, stream_id: Uuid) -> Option<IntegrationStream> {
        self.state.lock().streams.get(&stream_id).cloned()
    }

    pub fn streams(&self) -> Vec<IntegrationStream> {
        self.state.lock().streams.values().cloned().collect()
    }

    pub fn data_unit(&self, data_id: Uuid) -> Option<DataUnit> {
        self.state.lock().data_units.get(&data_id).cloned()
    }

    pub fn data_units(&self) -> Vec<DataUnit> {
        self.state.lock().data_units.values().cloned().collect()
    }

    pub fn run(&self, run_id: Uuid) -> Option<IntegrationRun> {
        self.state.lock().runs.get(&run_id).cloned()
    }

    pub fn integration(&self, integration_id: Uuid) -> Option<Integration> {
        self.state.lock().integrations.get(&integration_id).cloned()
    }

    pub fn webhook(&self, webhook_id: Uuid) -> Option<IncomingWebhook> {
        self.state.lock().webhooks.get(&webhook_id).cloned()
    }

    pub fn webhooks(&self) -> Vec<IncomingWebhook> {
        self.state.lock().webhooks.values().cloned().collect()
    }

    pub fn results(&self) -> Vec<IntegrationResult> {
        self.state.lock().results.clone()
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn get_stream_info(&self, stream_id: Uuid) -> Result<Option<StreamProcessingInfo>> {
        let state = self.state.lock();
        state.check_failure("get_stream_info")?;

        let Some(stream) = state.streams.get(&stream_id) else {
            return Ok(None);
        };
        let Some(integration) = state.integrations.get(&stream.integration_id) else {
            return Ok(None);
        };

        Ok(Some(StreamProcessingInfo {
            stream: stream.clone(),
            integration: integration.clone(),
            run: state.run_snapshot(&stream.scope),
        }))
    }

    async fn get_data_info(&self, data_id: Uuid) -> Result<Option<DataProcessingInfo>> {
        let state = self.state.lock();
        state.check_failure("get_data_info")?;

        let Some(unit) = state.data_units.get(&data_id) else {
            return Ok(None);
        };
        let Some(integration) = state.integrations.get(&unit.integration_id) else {
            return Ok(None);
        };

        Ok(Some(DataProcessingInfo {
            data: unit.clone(),
            integration: integration.clone(),
            run: state.run_snapshot(&unit.scope),
        }))
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<IntegrationRun>> {
        let state = self.state.lock();
        state.check_failure("get_run")?;
        Ok(state.runs.get(&run_id).cloned())
    }

    async fn get_webhook(&self, webhook_id: Uuid) -> Result<Option<IncomingWebhook>> {
        let state = self.state.lock();
        state.check_failure("get_webhook")?;
        Ok(state.webhooks.get(&webhook_id).cloned())
    }

    async fn get_stream_id_by_webhook_id(&self, webhook_id: Uuid) -> Result<Option<Uuid>> {
        let state = self.state.lock();
        state.check_failure("get_stream_id_by_webhook_id")?;
        Ok(state
            .streams
            .values()
            .filter(|stream| stream.scope.webhook_id() == Some(webhook_id))
            .min_by_key(|stream| stream.created_at)
            .map(|stream| stream.id))
    }

    async fn create_webhook(
        &self,
        tenant_id: Uuid,
        integration_id: Uuid,
        webhook_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let mut state = self.state.lock();
        state.check_failure("create_webhook")?;

        let id = Uuid::new_v4();
        state.webhooks.insert(
            id,
            IncomingWebhook {
                id,
                tenant_id,
                integration_id,
                webhook_type: webhook_type.to_string(),
                state: WebhookState::Pending,
                payload,
                error: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn publish_webhook_stream(&self, webhook: &IncomingWebhook) -> Result<Uuid> {
        let mut state = self.state.lock();
        state.check_failure("publish_webhook_stream")?;

        let scope = StreamScope::Webhook {
            webhook_id: webhook.id,
        };
        let identifier = webhook.id.to_string();
        if let Some(existing) = state
            .streams
            .values()
            .find(|stream| stream.scope == scope && stream.identifier == identifier)
        {
            return Ok(existing.id);
        }

        Ok(state.insert_stream_row(
            None,
            scope,
            webhook.tenant_id,
            webhook.integration_id,
            identifier,
            Some(webhook.payload.clone()),
        ))
    }

    async fn publish_child_stream(
        &self,
        stream: &NewStream,
        max_streams_per_run: Option<i64>,
    ) -> Result<ChildStreamInsert> {
        let mut state = self.state.lock();
        state.check_failure("publish_child_stream")?;

        if state.scope_taken(&stream.scope, &stream.identifier) {
            return Ok(ChildStreamInsert::Duplicate);
        }

        if let (Some(cap), Some(run_id)) = (max_streams_per_run, stream.scope.run_id()) {
            let count = state
                .streams
                .values()
                .filter(|existing| existing.scope.run_id() == Some(run_id))
                .count() as i64;
            if count >= cap {
                return Ok(ChildStreamInsert::CapReached { count });
            }
        }

        Ok(ChildStreamInsert::Inserted(state.insert_stream_row(
            Some(stream.parent_id),
            stream.scope,
            stream.tenant_id,
            stream.integration_id,
            stream.identifier.clone(),
            stream.data.clone(),
        )))
    }

    async fn publish_data(
        &self,
        stream: &IntegrationStream,
        data: serde_json::Value,
    ) -> Result<Uuid> {
        let mut state = self.state.lock();
        state.check_failure("publish_data")?;

        let now = Utc::now();
        let id = Uuid::new_v4();
        state.data_units.insert(
            id,
            DataUnit {
                id,
                stream_id: stream.id,
                scope: stream.scope,
                tenant_id: stream.tenant_id,
                integration_id: stream.integration_id,
                state: DataUnitState::Pending,
                data,
                retries: 0,
                error: None,
                delayed_until: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn publish_result(&self, unit: &DataUnit, result: &NewIntegrationResult) -> Result<Uuid> {
        let mut state = self.state.lock();
        state.check_failure("publish_result")?;

        let id = Uuid::new_v4();
        state.results.push(IntegrationResult {
            id,
            result_type: result.result_type.clone(),
            data: result.data.clone(),
            stream_id: unit.stream_id,
            data_id: result.data_id,
            tenant_id: unit.tenant_id,
            integration_id: unit.integration_id,
            onboarding: result.onboarding,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn mark_stream_processing(&self, stream_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_stream_processing")?;
        state.transition_stream(stream_id, UnitEvent::Start)?;
        Ok(())
    }

    async fn mark_stream_processed(&self, stream_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_stream_processed")?;
        let stream = state.transition_stream(stream_id, UnitEvent::Complete)?;
        stream.error = None;
        stream.delayed_until = None;
        Ok(())
    }

    async fn mark_stream_error(&self, stream_id: Uuid, error: &StructuredError) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_stream_error")?;
        let stream = state.transition_stream(stream_id, UnitEvent::Fail)?;
        stream.error = Some(error.to_json());
        stream.retries += 1;
        stream.delayed_until = None;
        Ok(())
    }

    async fn delay_stream(&self, stream_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("delay_stream")?;
        let stream = state.transition_stream(stream_id, UnitEvent::Delay)?;
        stream.delayed_until = Some(until);
        Ok(())
    }

    async fn reset_stream(&self, stream_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("reset_stream")?;
        let stream = state.transition_stream(stream_id, UnitEvent::Reset)?;
        stream.delayed_until = None;
        Ok(())
    }

    async fn delete_stream(&self, stream_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("delete_stream")?;
        state
            .streams
            .remove(&stream_id)
            .ok_or_else(|| missing_row("stream", stream_id))?;
        state.data_units.retain(|_, unit| unit.stream_id != stream_id);
        for stream in state.streams.values_mut() {
            if stream.parent_id == Some(stream_id) {
                stream.parent_id = None;
            }
        }
        Ok(())
    }

    async fn mark_data_processed(&self, data_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_data_processed")?;
        let unit = state.transition_data(data_id, UnitEvent::Complete)?;
        unit.error = None;
        unit.delayed_until = None;
        Ok(())
    }

    async fn mark_data_error(&self, data_id: Uuid, error: &StructuredError) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_data_error")?;
        let unit = state.transition_data(data_id, UnitEvent::Fail)?;
        unit.error = Some(error.to_json());
        unit.retries += 1;
        unit.delayed_until = None;
        Ok(())
    }

    async fn claim_data(&self, data_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        state.check_failure("claim_data")?;
        let Some(unit) = state.data_units.get_mut(&data_id) else {
            return Ok(false);
        };
        match DataUnitStateMachine::determine_target_state(unit.state, UnitEvent::Start) {
            Ok(claimed) => {
                unit.state = claimed;
                unit.updated_at = Utc::now();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn delay_data(&self, data_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("delay_data")?;
        let unit = state.transition_data(data_id, UnitEvent::Delay)?;
        unit.delayed_until = Some(until);
        Ok(())
    }

    async fn reset_data(&self, data_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("reset_data")?;
        let unit = state.transition_data(data_id, UnitEvent::Reset)?;
        unit.delayed_until = None;
        Ok(())
    }

    async fn touch_run(&self, run_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("touch_run")?;
        state.run_mut(run_id)?.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_run_error(&self, run_id: Uuid, error: &StructuredError) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_run_error")?;
        let run = state.run_mut(run_id)?;
        run.state = RunState::Error;
        run.error = Some(error.to_json());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn delay_run(&self, run_id: Uuid, until: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        state.check_failure("delay_run")?;
        let run = state.run_mut(run_id)?;
        if run.state.is_stopped() {
            return Ok(false);
        }
        run.state = RunState::Delayed;
        run.delayed_until = Some(until);
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_webhook_processed(&self, webhook_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_webhook_processed")?;
        let webhook = state.webhook_mut(webhook_id)?;
        webhook.state = WebhookState::Processed;
        webhook.error = None;
        Ok(())
    }

    async fn mark_webhook_error(&self, webhook_id: Uuid, error: &StructuredError) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("mark_webhook_error")?;
        let webhook = state.webhook_mut(webhook_id)?;
        webhook.state = WebhookState::Error;
        webhook.error = Some(error.to_json());
        Ok(())
    }

    async fn delete_webhook(&self, webhook_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("delete_webhook")?;
        state
            .webhooks
            .remove(&webhook_id)
            .ok_or_else(|| missing_row("webhook", webhook_id))?;
        state
            .streams
            .retain(|_, stream| stream.scope.webhook_id() != Some(webhook_id));
        state
            .data_units
            .retain(|_, unit| unit.scope.webhook_id() != Some(webhook_id));
        Ok(())
    }

    async fn update_integration_settings(
        &self,
        integration_id: Uuid,
        settings: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("update_integration_settings")?;
        let integration = state.integration_mut(integration_id)?;
        integration.settings = merge_settings(&integration.settings, settings);
        Ok(())
    }

    async fn update_integration_token(&self, integration_id: Uuid, token: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("update_integration_token")?;
        state.integration_mut(integration_id)?.token = Some(token.to_string());
        Ok(())
    }

    async fn update_integration_refresh_token(
        &self,
        integration_id: Uuid,
        refresh_token: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("update_integration_refresh_token")?;
        state.integration_mut(integration_id)?.refresh_token = Some(refresh_token.to_string());
        Ok(())
    }

    async fn get_ready_delayed_streams(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>> {
        let state = self.state.lock();
        state.check_failure("get_ready_delayed_streams")?;

        let mut ready: Vec<&IntegrationStream> = state
            .streams
            .values()
            .filter(|stream| stream.state == StreamState::Delayed)
            .filter(|stream| matches!(stream.delayed_until, Some(until) if until <= now))
            .filter(|stream| !state.run_in_error(&stream.scope))
            .collect();
        ready.sort_by_key(|stream| stream.delayed_until);

        Ok(ready
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|stream| state.processable(stream))
            .collect())
    }

    async fn get_ready_delayed_data(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>> {
        let state = self.state.lock();
        state.check_failure("get_ready_delayed_data")?;

        let mut ready: Vec<&DataUnit> = state
            .data_units
            .values()
            .filter(|unit| unit.state == DataUnitState::Delayed)
            .filter(|unit| matches!(unit.delayed_until, Some(until) if until <= now))
            .filter(|unit| !state.run_in_error(&unit.scope))
            .collect();
        ready.sort_by_key(|unit| unit.delayed_until);

        Ok(ready
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|unit| state.processable_data(unit))
            .collect())
    }

    async fn get_pending_run_streams(
        &self,
        run_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>> {
        let state = self.state.lock();
        state.check_failure("get_pending_run_streams")?;

        let mut pending: Vec<&IntegrationStream> = state
            .streams
            .values()
            .filter(|stream| stream.scope.run_id() == Some(run_id))
            .filter(|stream| stream.state == StreamState::Pending)
            .filter(|stream| after.map(|after| stream.id > after).unwrap_or(true))
            .collect();
        pending.sort_by_key(|stream| stream.id);

        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|stream| state.processable(stream))
            .collect())
    }

    async fn get_pending_run_data(
        &self,
        run_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>> {
        let state = self.state.lock();
        state.check_failure("get_pending_run_data")?;

        let mut pending: Vec<&DataUnit> = state
            .data_units
            .values()
            .filter(|unit| unit.scope.run_id() == Some(run_id))
            .filter(|unit| unit.state == DataUnitState::Pending)
            .filter(|unit| after.map(|after| unit.id > after).unwrap_or(true))
            .collect();
        pending.sort_by_key(|unit| unit.id);

        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|unit| state.processable_data(unit))
            .collect())
    }

    async fn get_stale_processing_streams(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>> {
        let state = self.state.lock();
        state.check_failure("get_stale_processing_streams")?;

        let mut stale: Vec<&IntegrationStream> = state
            .streams
            .values()
            .filter(|stream| stream.state == StreamState::Processing)
            .filter(|stream| stream.updated_at < older_than)
            .filter(|stream| !state.run_in_error(&stream.scope))
            .collect();
        stale.sort_by_key(|stream| stream.updated_at);

        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|stream| state.processable(stream))
            .collect())
    }

    async fn get_stale_processing_data(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>> {
        let state = self.state.lock();
        state.check_failure("get_stale_processing_data")?;

        let mut stale: Vec<&DataUnit> = state
            .data_units
            .values()
            .filter(|unit| unit.state == DataUnitState::Processing)
            .filter(|unit| unit.updated_at < older_than)
            .filter(|unit| !state.run_in_error(&unit.scope))
            .collect();
        stale.sort_by_key(|unit| unit.updated_at);

        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|unit| state.processable_data(unit))
            .collect())
    }
}
