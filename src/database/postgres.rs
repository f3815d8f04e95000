//! # PostgreSQL Stream Store
//!
//! Every state transition is a single conditional `UPDATE` guarded by the
//! source states the transition table allows, followed by a row-count check.
//! A transition that affects zero rows therefore means the unit was missing
//! or was moved by someone else in the meantime.

use super::store::StreamStore;
use crate::error::{check_update_row_count, Result};
use crate::models::{
    ChildStreamInsert, DataProcessingInfo, DataUnit, IncomingWebhook, Integration, IntegrationRun, IntegrationStream,
    NewIntegrationResult, NewStream, ProcessableData, ProcessableStream, RunSnapshot,
    StreamProcessingInfo, StreamScope, StructuredError,
};
use crate::state_machine::{
    DataUnitState, DataUnitStateMachine, RunState, StateMachineError, StreamState,
    StreamStateMachine, UnitEvent, WebhookState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStreamStore {
    pool: PgPool,
}

impl PgStreamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_state<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    T::from_str(value).map_err(|e| StateMachineError::InvalidStoredState(e).into())
}

fn stream_sources(event: UnitEvent) -> Vec<String> {
    StreamStateMachine::source_states(event)
        .into_iter()
        .map(|state| state.as_str().to_string())
        .collect()
}

fn data_sources(event: UnitEvent) -> Vec<String> {
    DataUnitStateMachine::source_states(event)
        .into_iter()
        .map(|state| state.as_str().to_string())
        .collect()
}

fn stopped_run_states() -> Vec<String> {
    [RunState::Error, RunState::IntegrationDeleted]
        .into_iter()
        .map(|state| state.as_str().to_string())
        .collect()
}

fn into_processable_data(rows: Vec<(Uuid, Uuid, String)>) -> Vec<ProcessableData> {
    rows.into_iter()
        .map(|(id, tenant_id, platform)| ProcessableData {
            id,
            tenant_id,
            platform,
        })
        .collect()
}

#[derive(Debug, FromRow)]
struct IntegrationColumns {
    integration_id: Uuid,
    tenant_id: Uuid,
    platform: String,
    integration_status: String,
    integration_identifier: Option<String>,
    settings: serde_json::Value,
    token: Option<String>,
    refresh_token: Option<String>,
}

impl From<IntegrationColumns> for Integration {
    fn from(row: IntegrationColumns) -> Self {
        Integration {
            id: row.integration_id,
            tenant_id: row.tenant_id,
            platform: row.platform,
            status: row.integration_status,
            integration_identifier: row.integration_identifier,
            settings: row.settings,
            token: row.token,
            refresh_token: row.refresh_token,
        }
    }
}

fn run_snapshot(
    run_id: Option<Uuid>,
    run_state: Option<String>,
    run_onboarding: Option<bool>,
) -> Result<Option<RunSnapshot>> {
    match (run_id, run_state) {
        (Some(id), Some(state)) => Ok(Some(RunSnapshot {
            id,
            state: parse_state::<RunState>(&state)?,
            onboarding: run_onboarding.unwrap_or(false),
        })),
        _ => Ok(None),
    }
}

const INTEGRATION_SELECT: &str = "i.platform, i.status AS integration_status, \
     i.integration_identifier, i.settings, i.token, i.refresh_token";

#[derive(Debug, FromRow)]
struct StreamInfoRow {
    id: Uuid,
    parent_id: Option<Uuid>,
    run_id: Option<Uuid>,
    webhook_id: Option<Uuid>,
    identifier: String,
    state: String,
    data: Option<serde_json::Value>,
    retries: i32,
    error: Option<serde_json::Value>,
    delayed_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    run_state: Option<String>,
    run_onboarding: Option<bool>,
    #[sqlx(flatten)]
    integration: IntegrationColumns,
}

impl TryFrom<StreamInfoRow> for StreamProcessingInfo {
    type Error = crate::error::IntegrationStreamError;

    fn try_from(row: StreamInfoRow) -> Result<Self> {
        let stream = IntegrationStream {
            id: row.id,
            parent_id: row.parent_id,
            scope: StreamScope::from_columns(row.run_id, row.webhook_id)?,
            tenant_id: row.integration.tenant_id,
            integration_id: row.integration.integration_id,
            identifier: row.identifier,
            state: parse_state::<StreamState>(&row.state)?,
            data: row.data,
            retries: row.retries,
            error: row.error,
            delayed_until: row.delayed_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        let run = run_snapshot(row.run_id, row.run_state, row.run_onboarding)?;

        Ok(StreamProcessingInfo {
            stream,
            integration: row.integration.into(),
            run,
        })
    }
}

#[derive(Debug, FromRow)]
struct DataInfoRow {
    id: Uuid,
    stream_id: Uuid,
    run_id: Option<Uuid>,
    webhook_id: Option<Uuid>,
    state: String,
    data: serde_json::Value,
    retries: i32,
    error: Option<serde_json::Value>,
    delayed_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    run_state: Option<String>,
    run_onboarding: Option<bool>,
    #[sqlx(flatten)]
    integration: IntegrationColumns,
}

impl TryFrom<DataInfoRow> for DataProcessingInfo {
    type Error = crate::error::IntegrationStreamError;

    fn try_from(row: DataInfoRow) -> Result<Self> {
        let data = DataUnit {
            id: row.id,
            stream_id: row.stream_id,
            scope: StreamScope::from_columns(row.run_id, row.webhook_id)?,
            tenant_id: row.integration.tenant_id,
            integration_id: row.integration.integration_id,
            state: parse_state::<DataUnitState>(&row.state)?,
            data: row.data,
            retries: row.retries,
            error: row.error,
            delayed_until: row.delayed_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        let run = run_snapshot(row.run_id, row.run_state, row.run_onboarding)?;

        Ok(DataProcessingInfo {
            data,
            integration: row.integration.into(),
            run,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: Uuid,
    tenant_id: Uuid,
    integration_id: Uuid,
    state: String,
    onboarding: bool,
    delayed_until: Option<DateTime<Utc>>,
    error: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct WebhookRow {
    id: Uuid,
    tenant_id: Uuid,
    integration_id: Uuid,
    webhook_type: String,
    state: String,
    payload: serde_json::Value,
    error: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ProcessableStreamRow {
    id: Uuid,
    tenant_id: Uuid,
    platform: String,
    run_id: Option<Uuid>,
    webhook_id: Option<Uuid>,
    onboarding: Option<bool>,
}

impl TryFrom<ProcessableStreamRow> for ProcessableStream {
    type Error = crate::error::IntegrationStreamError;

    fn try_from(row: ProcessableStreamRow) -> Result<Self> {
        Ok(ProcessableStream {
            id: row.id,
            tenant_id: row.tenant_id,
            platform: row.platform,
            scope: StreamScope::from_columns(row.run_id, row.webhook_id)?,
            onboarding: row.onboarding,
        })
    }
}

fn into_processable(rows: Vec<ProcessableStreamRow>) -> Result<Vec<ProcessableStream>> {
    rows.into_iter().map(ProcessableStream::try_from).collect()
}

const PROCESSABLE_STREAM_SELECT: &str = "SELECT s.id, s.tenant_id, i.platform, s.run_id, \
     s.webhook_id, r.onboarding \
     FROM integration_streams s \
     JOIN integrations i ON i.id = s.integration_id \
     LEFT JOIN integration_runs r ON r.id = s.run_id";

#[async_trait]
impl StreamStore for PgStreamStore {
    #[instrument(skip(self))]
    async fn get_stream_info(&self, stream_id: Uuid) -> Result<Option<StreamProcessingInfo>> {
        let query = format!(
            "SELECT s.id, s.parent_id, s.run_id, s.webhook_id, s.identifier, s.state, s.data, \
                    s.retries, s.error, s.delayed_until, s.created_at, s.updated_at, \
                    s.tenant_id, s.integration_id, {INTEGRATION_SELECT}, \
                    r.state AS run_state, r.onboarding AS run_onboarding \
             FROM integration_streams s \
             JOIN integrations i ON i.id = s.integration_id \
             LEFT JOIN integration_runs r ON r.id = s.run_id \
             WHERE s.id = $1"
        );

        let row = sqlx::query_as::<_, StreamInfoRow>(&query)
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StreamProcessingInfo::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_data_info(&self, data_id: Uuid) -> Result<Option<DataProcessingInfo>> {
        let query = format!(
            "SELECT d.id, d.stream_id, d.run_id, d.webhook_id, d.state, d.data, d.retries, \
                    d.error, d.delayed_until, d.created_at, d.updated_at, \
                    d.tenant_id, d.integration_id, {INTEGRATION_SELECT}, \
                    r.state AS run_state, r.onboarding AS run_onboarding \
             FROM integration_api_data d \
             JOIN integrations i ON i.id = d.integration_id \
             LEFT JOIN integration_runs r ON r.id = d.run_id \
             WHERE d.id = $1"
        );

        let row = sqlx::query_as::<_, DataInfoRow>(&query)
            .bind(data_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DataProcessingInfo::try_from).transpose()
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<IntegrationRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT id, tenant_id, integration_id, state, onboarding, delayed_until, error, updated_at \
             FROM integration_runs WHERE id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(IntegrationRun {
                id: row.id,
                tenant_id: row.tenant_id,
                integration_id: row.integration_id,
                state: parse_state::<RunState>(&row.state)?,
                onboarding: row.onboarding,
                delayed_until: row.delayed_until,
                error: row.error,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }

    async fn get_webhook(&self, webhook_id: Uuid) -> Result<Option<IncomingWebhook>> {
        let row = sqlx::query_as::<_, WebhookRow>(
            "SELECT id, tenant_id, integration_id, webhook_type, state, payload, error, created_at \
             FROM incoming_webhooks WHERE id = $1",
        )
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(IncomingWebhook {
                id: row.id,
                tenant_id: row.tenant_id,
                integration_id: row.integration_id,
                webhook_type: row.webhook_type,
                state: parse_state::<WebhookState>(&row.state)?,
                payload: row.payload,
                error: row.error,
                created_at: row.created_at,
            })
        })
        .transpose()
    }

    async fn get_stream_id_by_webhook_id(&self, webhook_id: Uuid) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM integration_streams WHERE webhook_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn create_webhook(
        &self,
        tenant_id: Uuid,
        integration_id: Uuid,
        webhook_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO incoming_webhooks (id, tenant_id, integration_id, webhook_type, state, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(integration_id)
        .bind(webhook_type)
        .bind(WebhookState::Pending.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self, webhook), fields(webhook_id = %webhook.id))]
    async fn publish_webhook_stream(&self, webhook: &IncomingWebhook) -> Result<Uuid> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO integration_streams \
                 (id, webhook_id, tenant_id, integration_id, identifier, state, data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT DO NOTHING \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(webhook.id)
        .bind(webhook.tenant_id)
        .bind(webhook.integration_id)
        .bind(webhook.id.to_string())
        .bind(StreamState::Pending.as_str())
        .bind(&webhook.payload)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        // Lost the race to a concurrent delivery of the same webhook
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM integration_streams WHERE webhook_id = $1 AND identifier = $2",
        )
        .bind(webhook.id)
        .bind(webhook.id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(existing)
    }

    #[instrument(skip(self, stream), fields(parent_id = %stream.parent_id))]
    async fn publish_child_stream(
        &self,
        stream: &NewStream,
        max_streams_per_run: Option<i64>,
    ) -> Result<ChildStreamInsert> {
        let mut tx = self.pool.begin().await?;

        if let (Some(cap), Some(run_id)) = (max_streams_per_run, stream.scope.run_id()) {
            // Serializes child inserts of one run so the count cannot race
            sqlx::query("SELECT id FROM integration_runs WHERE id = $1 FOR UPDATE")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;

            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM integration_streams \
                                WHERE run_id = $1 AND identifier = $2)",
            )
            .bind(run_id)
            .bind(&stream.identifier)
            .fetch_one(&mut *tx)
            .await?;
            if exists {
                tx.commit().await?;
                debug!(identifier = %stream.identifier, "Child stream already exists");
                return Ok(ChildStreamInsert::Duplicate);
            }

            let count = sqlx::query_scalar::<_, i64>(
                "SELECT count(*) FROM integration_streams WHERE run_id = $1",
            )
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?;
            if count >= cap {
                tx.commit().await?;
                return Ok(ChildStreamInsert::CapReached { count });
            }
        }

        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO integration_streams \
                 (id, parent_id, run_id, webhook_id, tenant_id, integration_id, identifier, state, data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT DO NOTHING \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(stream.parent_id)
        .bind(stream.scope.run_id())
        .bind(stream.scope.webhook_id())
        .bind(stream.tenant_id)
        .bind(stream.integration_id)
        .bind(&stream.identifier)
        .bind(StreamState::Pending.as_str())
        .bind(&stream.data)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match id {
            Some(id) => Ok(ChildStreamInsert::Inserted(id)),
            None => {
                debug!(identifier = %stream.identifier, "Child stream already exists");
                Ok(ChildStreamInsert::Duplicate)
            }
        }
    }

    async fn publish_data(
        &self,
        stream: &IntegrationStream,
        data: serde_json::Value,
    ) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO integration_api_data \
                 (id, stream_id, run_id, webhook_id, tenant_id, integration_id, state, data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(stream.id)
        .bind(stream.scope.run_id())
        .bind(stream.scope.webhook_id())
        .bind(stream.tenant_id)
        .bind(stream.integration_id)
        .bind(DataUnitState::Pending.as_str())
        .bind(data)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn publish_result(&self, unit: &DataUnit, result: &NewIntegrationResult) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO integration_results \
                 (id, result_type, data, stream_id, api_data_id, run_id, webhook_id, \
                  tenant_id, integration_id, onboarding) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(result.result_type.as_str())
        .bind(&result.data)
        .bind(unit.stream_id)
        .bind(result.data_id)
        .bind(unit.scope.run_id())
        .bind(unit.scope.webhook_id())
        .bind(unit.tenant_id)
        .bind(unit.integration_id)
        .bind(result.onboarding)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_stream_processing(&self, stream_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_streams SET state = $2, updated_at = now() \
             WHERE id = $1 AND state = ANY($3)",
        )
        .bind(stream_id)
        .bind(StreamState::Processing.as_str())
        .bind(stream_sources(UnitEvent::Start))
        .execute(&self.pool)
        .await?;
        check_update_row_count("stream", stream_id, result.rows_affected(), 1)
    }

    async fn mark_stream_processed(&self, stream_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_streams \
             SET state = $2, error = NULL, delayed_until = NULL, updated_at = now() \
             WHERE id = $1 AND state = ANY($3)",
        )
        .bind(stream_id)
        .bind(StreamState::Processed.as_str())
        .bind(stream_sources(UnitEvent::Complete))
        .execute(&self.pool)
        .await?;
        check_update_row_count("stream", stream_id, result.rows_affected(), 1)
    }

    async fn mark_stream_error(&self, stream_id: Uuid, error: &StructuredError) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_streams \
             SET state = $2, error = $3, retries = retries + 1, delayed_until = NULL, \
                 updated_at = now() \
             WHERE id = $1 AND state = ANY($4)",
        )
        .bind(stream_id)
        .bind(StreamState::Error.as_str())
        .bind(error.to_json())
        .bind(stream_sources(UnitEvent::Fail))
        .execute(&self.pool)
        .await?;
        check_update_row_count("stream", stream_id, result.rows_affected(), 1)
    }

    async fn delay_stream(&self, stream_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_streams SET state = $2, delayed_until = $3, updated_at = now() \
             WHERE id = $1 AND state = ANY($4)",
        )
        .bind(stream_id)
        .bind(StreamState::Delayed.as_str())
        .bind(until)
        .bind(stream_sources(UnitEvent::Delay))
        .execute(&self.pool)
        .await?;
        check_update_row_count("stream", stream_id, result.rows_affected(), 1)
    }

    async fn reset_stream(&self, stream_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_streams SET state = $2, delayed_until = NULL, updated_at = now() \
             WHERE id = $1 AND state = ANY($3)",
        )
        .bind(stream_id)
        .bind(StreamState::Pending.as_str())
        .bind(stream_sources(UnitEvent::Reset))
        .execute(&self.pool)
        .await?;
        check_update_row_count("stream", stream_id, result.rows_affected(), 1)
    }

    async fn delete_stream(&self, stream_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM integration_streams WHERE id = $1")
            .bind(stream_id)
            .execute(&self.pool)
            .await?;
        check_update_row_count("stream", stream_id, result.rows_affected(), 1)
    }

    async fn mark_data_processed(&self, data_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_api_data \
             SET state = $2, error = NULL, delayed_until = NULL, updated_at = now() \
             WHERE id = $1 AND state = ANY($3)",
        )
        .bind(data_id)
        .bind(DataUnitState::Processed.as_str())
        .bind(data_sources(UnitEvent::Complete))
        .execute(&self.pool)
        .await?;
        check_update_row_count("data unit", data_id, result.rows_affected(), 1)
    }

    async fn mark_data_error(&self, data_id: Uuid, error: &StructuredError) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_api_data \
             SET state = $2, error = $3, retries = retries + 1, delayed_until = NULL, \
                 updated_at = now() \
             WHERE id = $1 AND state = ANY($4)",
        )
        .bind(data_id)
        .bind(DataUnitState::Error.as_str())
        .bind(error.to_json())
        .bind(data_sources(UnitEvent::Fail))
        .execute(&self.pool)
        .await?;
        check_update_row_count("data unit", data_id, result.rows_affected(), 1)
    }

    async fn claim_data(&self, data_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE integration_api_data SET state = $2, updated_at = now() \
             WHERE id = $1 AND state = ANY($3)",
        )
        .bind(data_id)
        .bind(DataUnitState::Processing.as_str())
        .bind(data_sources(UnitEvent::Start))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delay_data(&self, data_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_api_data SET state = $2, delayed_until = $3, updated_at = now() \
             WHERE id = $1 AND state = ANY($4)",
        )
        .bind(data_id)
        .bind(DataUnitState::Delayed.as_str())
        .bind(until)
        .bind(data_sources(UnitEvent::Delay))
        .execute(&self.pool)
        .await?;
        check_update_row_count("data unit", data_id, result.rows_affected(), 1)
    }

    async fn reset_data(&self, data_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_api_data SET state = $2, delayed_until = NULL, updated_at = now() \
             WHERE id = $1 AND state = ANY($3)",
        )
        .bind(data_id)
        .bind(DataUnitState::Pending.as_str())
        .bind(data_sources(UnitEvent::Reset))
        .execute(&self.pool)
        .await?;
        check_update_row_count("data unit", data_id, result.rows_affected(), 1)
    }

    async fn touch_run(&self, run_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE integration_runs SET updated_at = now() WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        check_update_row_count("run", run_id, result.rows_affected(), 1)
    }

    #[instrument(skip(self, error), fields(location = %error.location))]
    async fn mark_run_error(&self, run_id: Uuid, error: &StructuredError) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integration_runs SET state = $2, error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(run_id)
        .bind(RunState::Error.as_str())
        .bind(error.to_json())
        .execute(&self.pool)
        .await?;
        check_update_row_count("run", run_id, result.rows_affected(), 1)
    }

    async fn delay_run(&self, run_id: Uuid, until: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE integration_runs SET state = $2, delayed_until = $3, updated_at = now() \
             WHERE id = $1 AND state <> ALL($4)",
        )
        .bind(run_id)
        .bind(RunState::Delayed.as_str())
        .bind(until)
        .bind(stopped_run_states())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM integration_runs WHERE id = $1)",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            check_update_row_count("run", run_id, 0, 1)?;
        }
        Ok(false)
    }

    async fn mark_webhook_processed(&self, webhook_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE incoming_webhooks SET state = $2, error = NULL, processed_at = now() \
             WHERE id = $1",
        )
        .bind(webhook_id)
        .bind(WebhookState::Processed.as_str())
        .execute(&self.pool)
        .await?;
        check_update_row_count("webhook", webhook_id, result.rows_affected(), 1)
    }

    async fn mark_webhook_error(&self, webhook_id: Uuid, error: &StructuredError) -> Result<()> {
        let result = sqlx::query(
            "UPDATE incoming_webhooks SET state = $2, error = $3, processed_at = now() \
             WHERE id = $1",
        )
        .bind(webhook_id)
        .bind(WebhookState::Error.as_str())
        .bind(error.to_json())
        .execute(&self.pool)
        .await?;
        check_update_row_count("webhook", webhook_id, result.rows_affected(), 1)
    }

    async fn delete_webhook(&self, webhook_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM incoming_webhooks WHERE id = $1")
            .bind(webhook_id)
            .execute(&self.pool)
            .await?;
        check_update_row_count("webhook", webhook_id, result.rows_affected(), 1)
    }

    async fn update_integration_settings(
        &self,
        integration_id: Uuid,
        settings: &serde_json::Value,
    ) -> Result<()> {
        // `||` on two objects is a shallow merge; anything else replaces
        let result = sqlx::query(
            "UPDATE integrations \
             SET settings = CASE \
                     WHEN jsonb_typeof(settings) = 'object' AND jsonb_typeof($2::jsonb) = 'object' \
                     THEN settings || $2::jsonb \
                     ELSE $2::jsonb \
                 END, \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(integration_id)
        .bind(settings)
        .execute(&self.pool)
        .await?;
        check_update_row_count("integration", integration_id, result.rows_affected(), 1)
    }

    async fn update_integration_token(&self, integration_id: Uuid, token: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE integrations SET token = $2, updated_at = now() WHERE id = $1")
                .bind(integration_id)
                .bind(token)
                .execute(&self.pool)
                .await?;
        check_update_row_count("integration", integration_id, result.rows_affected(), 1)
    }

    async fn update_integration_refresh_token(
        &self,
        integration_id: Uuid,
        refresh_token: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE integrations SET refresh_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(integration_id)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;
        check_update_row_count("integration", integration_id, result.rows_affected(), 1)
    }

    async fn get_ready_delayed_streams(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>> {
        let query = format!(
            "{PROCESSABLE_STREAM_SELECT} \
             WHERE s.state = $1 AND s.delayed_until <= $2 \
               AND (s.run_id IS NULL OR r.state <> $3) \
             ORDER BY s.delayed_until \
             LIMIT $4"
        );

        let rows = sqlx::query_as::<_, ProcessableStreamRow>(&query)
            .bind(StreamState::Delayed.as_str())
            .bind(now)
            .bind(RunState::Error.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_processable(rows)
    }

    async fn get_ready_delayed_data(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            "SELECT d.id, d.tenant_id, i.platform \
             FROM integration_api_data d \
             JOIN integrations i ON i.id = d.integration_id \
             LEFT JOIN integration_runs r ON r.id = d.run_id \
             WHERE d.state = $1 AND d.delayed_until <= $2 \
               AND (d.run_id IS NULL OR r.state <> $3) \
             ORDER BY d.delayed_until \
             LIMIT $4",
        )
        .bind(DataUnitState::Delayed.as_str())
        .bind(now)
        .bind(RunState::Error.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(into_processable_data(rows))
    }

    async fn get_pending_run_streams(
        &self,
        run_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>> {
        let query = format!(
            "{PROCESSABLE_STREAM_SELECT} \
             WHERE s.run_id = $1 AND s.state = $2 AND ($3::uuid IS NULL OR s.id > $3) \
             ORDER BY s.id \
             LIMIT $4"
        );

        let rows = sqlx::query_as::<_, ProcessableStreamRow>(&query)
            .bind(run_id)
            .bind(StreamState::Pending.as_str())
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_processable(rows)
    }

    async fn get_pending_run_data(
        &self,
        run_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            "SELECT d.id, d.tenant_id, i.platform \
             FROM integration_api_data d \
             JOIN integrations i ON i.id = d.integration_id \
             WHERE d.run_id = $1 AND d.state = $2 AND ($3::uuid IS NULL OR d.id > $3) \
             ORDER BY d.id \
             LIMIT $4",
        )
        .bind(run_id)
        .bind(DataUnitState::Pending.as_str())
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(into_processable_data(rows))
    }

    async fn get_stale_processing_streams(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableStream>> {
        let query = format!(
            "{PROCESSABLE_STREAM_SELECT} \
             WHERE s.state = $1 AND s.updated_at < $2 \
               AND (s.run_id IS NULL OR r.state <> $3) \
             ORDER BY s.updated_at \
             LIMIT $4"
        );

        let rows = sqlx::query_as::<_, ProcessableStreamRow>(&query)
            .bind(StreamState::Processing.as_str())
            .bind(older_than)
            .bind(RunState::Error.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_processable(rows)
    }

    async fn get_stale_processing_data(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProcessableData>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            "SELECT d.id, d.tenant_id, i.platform \
             FROM integration_api_data d \
             JOIN integrations i ON i.id = d.integration_id \
             LEFT JOIN integration_runs r ON r.id = d.run_id \
             WHERE d.state = $1 AND d.updated_at < $2 \
               AND (d.run_id IS NULL OR r.state <> $3) \
             ORDER BY d.updated_at \
             LIMIT $4",
        )
        .bind(DataUnitState::Processing.as_str())
        .bind(older_than)
        .bind(RunState::Error.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(into_processable_data(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_state_binds_match_transition_table() {
        assert_eq!(stream_sources(UnitEvent::Start), vec!["pending".to_string()]);
        assert_eq!(
            stream_sources(UnitEvent::Fail),
            vec!["pending".to_string(), "processing".to_string()]
        );
        assert_eq!(data_sources(UnitEvent::Complete), vec!["processing".to_string()]);
        assert_eq!(data_sources(UnitEvent::Start), vec!["pending".to_string()]);
        assert_eq!(
            stopped_run_states(),
            vec!["error".to_string(), "integration_deleted".to_string()]
        );
    }

    #[test]
    fn test_stored_state_parse_errors_surface() {
        let err = parse_state::<StreamState>("running").unwrap_err();
        assert!(matches!(
            err,
            crate::error::IntegrationStreamError::StateTransitionError(_)
        ));
    }
}
