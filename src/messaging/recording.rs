//! Emitter that records notifications instead of sending them. Used by the
//! test suite and by local dry runs.

use super::emitter::{
    DataSinkEmitter, DataWorkerEmitter, Notification, RunWorkerEmitter, StreamWorkerEmitter,
};
use super::errors::{MessagingError, MessagingResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct RecordingEmitter {
    notifications: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every emit fails without recording
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn clear(&self) {
        self.notifications.lock().clear();
    }

    pub fn stream_ready(&self) -> Vec<Uuid> {
        self.collect(|n| match n {
            Notification::StreamReady { stream_id, .. } => Some(*stream_id),
            _ => None,
        })
    }

    pub fn webhook_ready(&self) -> Vec<Uuid> {
        self.collect(|n| match n {
            Notification::WebhookReady { webhook_id, .. } => Some(*webhook_id),
            _ => None,
        })
    }

    pub fn data_ready(&self) -> Vec<Uuid> {
        self.collect(|n| match n {
            Notification::DataReady { data_id, .. } => Some(*data_id),
            _ => None,
        })
    }

    pub fn results_ready(&self) -> Vec<(Uuid, String)> {
        self.collect(|n| match n {
            Notification::ResultReady {
                result_id,
                natural_key,
                ..
            } => Some((*result_id, natural_key.clone())),
            _ => None,
        })
    }

    pub fn run_stream_finished(&self) -> Vec<Uuid> {
        self.collect(|n| match n {
            Notification::RunStreamFinished { run_id, .. } => Some(*run_id),
            _ => None,
        })
    }

    fn collect<T>(&self, f: impl Fn(&Notification) -> Option<T>) -> Vec<T> {
        self.notifications.lock().iter().filter_map(f).collect()
    }

    fn record(&self, notification: Notification) -> MessagingResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MessagingError::internal("recording emitter set to fail"));
        }
        self.notifications.lock().push(notification);
        Ok(())
    }
}

#[async_trait]
impl StreamWorkerEmitter for RecordingEmitter {
    async fn trigger_stream_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        stream_id: Uuid,
        onboarding: bool,
    ) -> MessagingResult<()> {
        self.record(Notification::StreamReady {
            tenant_id,
            platform: platform.to_string(),
            stream_id,
            onboarding,
        })
    }

    async fn trigger_webhook_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        webhook_id: Uuid,
    ) -> MessagingResult<()> {
        self.record(Notification::WebhookReady {
            tenant_id,
            platform: platform.to_string(),
            webhook_id,
        })
    }
}

#[async_trait]
impl DataWorkerEmitter for RecordingEmitter {
    async fn trigger_data_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        data_id: Uuid,
    ) -> MessagingResult<()> {
        self.record(Notification::DataReady {
            tenant_id,
            platform: platform.to_string(),
            data_id,
        })
    }
}

#[async_trait]
impl RunWorkerEmitter for RecordingEmitter {
    async fn stream_processed(
        &self,
        tenant_id: Uuid,
        platform: &str,
        run_id: Uuid,
    ) -> MessagingResult<()> {
        self.record(Notification::RunStreamFinished {
            tenant_id,
            platform: platform.to_string(),
            run_id,
        })
    }
}

#[async_trait]
impl DataSinkEmitter for RecordingEmitter {
    async fn trigger_result_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        result_id: Uuid,
        natural_key: &str,
        onboarding: bool,
    ) -> MessagingResult<()> {
        self.record(Notification::ResultReady {
            tenant_id,
            platform: platform.to_string(),
            result_id,
            natural_key: natural_key.to_string(),
            onboarding,
        })
    }
}
