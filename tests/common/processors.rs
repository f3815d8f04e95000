//! Scripted platform processor: runs a fixed list of context calls, then
//! returns the scripted outcome.

use super::fixtures::PLATFORM;
use async_trait::async_trait;
use integration_stream::models::{ActivityData, ResultType};
use integration_stream::orchestration::{
    DataContext, PlatformProcessor, ProcessorError, StreamContext,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum Step {
    PublishData(Value),
    PublishStream(String, Option<Value>),
    PublishActivity(ActivityData),
    PublishCustom(Value, ResultType),
    UpdateSettings(Value),
    UpdateToken(String),
    UpdateRefreshToken(String),
    CacheSet(String, String),
    IntegrationCacheSet(String, String),
    GlobalCacheSet(String, String),
    /// `(max_requests, window_seconds, counter_key)` against the shared limiter
    CheckRateLimit(u32, u64, String),
    ExtendLease(i32),
    Abort(String),
    AbortRun(String),
    Fail(String),
    RateLimit(i64),
    /// Park the invocation until the test calls `release`
    WaitForRelease,
}

#[derive(Default)]
pub struct ScriptedProcessor {
    stream_steps: Vec<Step>,
    data_steps: Vec<Step>,
    stream_calls: AtomicUsize,
    data_calls: AtomicUsize,
    /// Errors returned by context callbacks, in call order
    callback_errors: Mutex<Vec<String>>,
    gate: Notify,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stream(mut self, steps: Vec<Step>) -> Self {
        self.stream_steps = steps;
        self
    }

    pub fn on_data(mut self, steps: Vec<Step>) -> Self {
        self.data_steps = steps;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }

    /// Let one parked invocation continue; a release before anyone waits is
    /// kept for the next waiter
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Yield until the first stream or data invocation has started
    pub async fn wait_until_invoked(&self) {
        while self.stream_calls() + self.data_calls() == 0 {
            tokio::task::yield_now().await;
        }
    }

    pub fn callback_errors(&self) -> Vec<String> {
        self.callback_errors.lock().clone()
    }

    fn record<T>(&self, result: Result<T, ProcessorError>) -> Result<T, ProcessorError> {
        if let Err(err) = &result {
            self.callback_errors.lock().push(err.to_string());
        }
        result
    }
}

#[async_trait]
impl PlatformProcessor for ScriptedProcessor {
    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn process_stream(&self, ctx: &StreamContext) -> Result<(), ProcessorError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        for step in &self.stream_steps {
            match step {
                Step::PublishData(data) => {
                    self.record(ctx.publish_data(data.clone()).await)?;
                }
                Step::PublishStream(identifier, data) => {
                    self.record(ctx.publish_stream(identifier.clone(), data.clone()).await)?;
                }
                Step::UpdateSettings(settings) => {
                    self.record(ctx.update_integration_settings(settings).await)?;
                }
                Step::UpdateToken(token) => {
                    self.record(ctx.update_integration_token(token).await)?;
                }
                Step::UpdateRefreshToken(token) => {
                    self.record(ctx.update_integration_refresh_token(token).await)?;
                }
                Step::CacheSet(key, value) => {
                    ctx.cache().set(key, value).await?;
                }
                Step::IntegrationCacheSet(key, value) => {
                    ctx.integration_cache().set(key, value).await?;
                }
                Step::GlobalCacheSet(key, value) => {
                    ctx.global_cache().set(key, value).await?;
                }
                Step::CheckRateLimit(max_requests, window_seconds, counter_key) => {
                    ctx.get_rate_limiter(*max_requests, *window_seconds, counter_key)
                        .check_rate_limit()
                        .await?;
                }
                Step::ExtendLease(seconds) => {
                    self.record(ctx.set_message_visibility_timeout(*seconds).await)?;
                }
                Step::Abort(message) => {
                    self.record(ctx.abort_with_error(message, None, None).await)?;
                    return Ok(());
                }
                Step::AbortRun(message) => {
                    self.record(ctx.abort_run_with_error(message, None, None).await)?;
                    return Ok(());
                }
                Step::Fail(message) => return Err(ProcessorError::failed(message.clone())),
                Step::RateLimit(seconds) => return Err(ProcessorError::rate_limit(*seconds)),
                Step::WaitForRelease => self.gate.notified().await,
                Step::PublishActivity(_) | Step::PublishCustom(..) => {
                    panic!("result publishing is only available to the data stage")
                }
            }
        }
        Ok(())
    }

    async fn process_data(&self, ctx: &DataContext) -> Result<(), ProcessorError> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);

        for step in &self.data_steps {
            match step {
                Step::PublishActivity(activity) => {
                    self.record(ctx.publish_activity(activity.clone()).await)?;
                }
                Step::PublishCustom(entity, result_type) => {
                    self.record(ctx.publish_custom(entity.clone(), result_type.clone()).await)?;
                }
                Step::PublishStream(identifier, data) => {
                    self.record(ctx.publish_stream(identifier.clone(), data.clone()).await)?;
                }
                Step::UpdateSettings(settings) => {
                    self.record(ctx.update_integration_settings(settings).await)?;
                }
                Step::UpdateToken(token) => {
                    self.record(ctx.update_integration_token(token).await)?;
                }
                Step::UpdateRefreshToken(token) => {
                    self.record(ctx.update_integration_refresh_token(token).await)?;
                }
                Step::CacheSet(key, value) => {
                    ctx.cache().set(key, value).await?;
                }
                Step::IntegrationCacheSet(key, value) => {
                    ctx.integration_cache().set(key, value).await?;
                }
                Step::GlobalCacheSet(key, value) => {
                    ctx.global_cache().set(key, value).await?;
                }
                Step::CheckRateLimit(max_requests, window_seconds, counter_key) => {
                    ctx.get_rate_limiter(*max_requests, *window_seconds, counter_key)
                        .check_rate_limit()
                        .await?;
                }
                Step::Abort(message) => {
                    self.record(ctx.abort_with_error(message, None, None).await)?;
                    return Ok(());
                }
                Step::AbortRun(message) => {
                    self.record(ctx.abort_run_with_error(message, None, None).await)?;
                    return Ok(());
                }
                Step::Fail(message) => return Err(ProcessorError::failed(message.clone())),
                Step::RateLimit(seconds) => return Err(ProcessorError::rate_limit(*seconds)),
                Step::WaitForRelease => self.gate.notified().await,
                Step::PublishData(_) | Step::ExtendLease(_) => {
                    panic!("only the stream stage publishes data and holds a lease")
                }
            }
        }
        Ok(())
    }
}

pub fn activity(source_id: &str) -> ActivityData {
    ActivityData {
        activity_type: "message".to_string(),
        timestamp: chrono::Utc::now(),
        source_id: source_id.to_string(),
        source_parent_id: None,
        channel: Some("general".to_string()),
        title: None,
        body: Some("hello".to_string()),
        url: None,
        member: serde_json::json!({"username": "ada"}),
        attributes: Value::Null,
    }
}
