//! # Emitters
//!
//! Outgoing notifications to collaborating workers. Each collaborator has its
//! own trait so that a component only depends on the notifications it sends;
//! [`QueueEmitter`] implements all of them over a [`QueueTransport`].

use super::errors::MessagingResult;
use super::message::{DataSinkMessage, RunWorkerMessage, WorkerMessage};
use super::transport::QueueTransport;
use crate::config::QueueConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Schedules stream processing on the stream worker queue
#[async_trait]
pub trait StreamWorkerEmitter: Send + Sync {
    async fn trigger_stream_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        stream_id: Uuid,
        onboarding: bool,
    ) -> MessagingResult<()>;

    async fn trigger_webhook_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        webhook_id: Uuid,
    ) -> MessagingResult<()>;
}

/// Schedules data unit transformation
#[async_trait]
pub trait DataWorkerEmitter: Send + Sync {
    async fn trigger_data_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        data_id: Uuid,
    ) -> MessagingResult<()>;
}

/// Heartbeat towards the run-completion detector
#[async_trait]
pub trait RunWorkerEmitter: Send + Sync {
    async fn stream_processed(
        &self,
        tenant_id: Uuid,
        platform: &str,
        run_id: Uuid,
    ) -> MessagingResult<()>;
}

/// Hands published results to the data sink
#[async_trait]
pub trait DataSinkEmitter: Send + Sync {
    async fn trigger_result_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        result_id: Uuid,
        natural_key: &str,
        onboarding: bool,
    ) -> MessagingResult<()>;
}

/// Every notification the core can send, as observed by collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    StreamReady {
        tenant_id: Uuid,
        platform: String,
        stream_id: Uuid,
        onboarding: bool,
    },
    WebhookReady {
        tenant_id: Uuid,
        platform: String,
        webhook_id: Uuid,
    },
    DataReady {
        tenant_id: Uuid,
        platform: String,
        data_id: Uuid,
    },
    ResultReady {
        tenant_id: Uuid,
        platform: String,
        result_id: Uuid,
        natural_key: String,
        onboarding: bool,
    },
    RunStreamFinished {
        tenant_id: Uuid,
        platform: String,
        run_id: Uuid,
    },
}

/// Emitter writing JSON messages to the configured queues
#[derive(Clone)]
pub struct QueueEmitter {
    transport: Arc<dyn QueueTransport>,
    queues: QueueConfig,
}

impl QueueEmitter {
    pub fn new(transport: Arc<dyn QueueTransport>, queues: QueueConfig) -> Self {
        Self { transport, queues }
    }

    /// Create every queue this emitter writes to
    pub async fn ensure_queues(&self) -> MessagingResult<()> {
        for queue in [
            &self.queues.stream_queue,
            &self.queues.data_queue,
            &self.queues.run_queue,
            &self.queues.data_sink_queue,
        ] {
            self.transport.ensure_queue(queue).await?;
        }
        Ok(())
    }

    async fn send<T: Serialize + Sync>(&self, queue: &str, message: &T) -> MessagingResult<()> {
        let payload = serde_json::to_value(message)?;
        let msg_id = self.transport.send(queue, &payload).await?;
        debug!(queue, msg_id, "Notification queued");
        Ok(())
    }
}

#[async_trait]
impl StreamWorkerEmitter for QueueEmitter {
    async fn trigger_stream_processing(
        &self,
        _tenant_id: Uuid,
        platform: &str,
        stream_id: Uuid,
        onboarding: bool,
    ) -> MessagingResult<()> {
        let message = WorkerMessage::ProcessStream {
            stream_id,
            platform: Some(platform.to_string()),
            onboarding: Some(onboarding),
        };
        self.send(&self.queues.stream_queue, &message).await
    }

    async fn trigger_webhook_processing(
        &self,
        _tenant_id: Uuid,
        platform: &str,
        webhook_id: Uuid,
    ) -> MessagingResult<()> {
        let message = WorkerMessage::ProcessWebhookStream {
            webhook_id,
            platform: Some(platform.to_string()),
        };
        self.send(&self.queues.stream_queue, &message).await
    }
}

#[async_trait]
impl DataWorkerEmitter for QueueEmitter {
    async fn trigger_data_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        data_id: Uuid,
    ) -> MessagingResult<()> {
        let message = WorkerMessage::ProcessData {
            data_id,
            tenant_id: Some(tenant_id),
            platform: Some(platform.to_string()),
        };
        self.send(&self.queues.data_queue, &message).await
    }
}

#[async_trait]
impl RunWorkerEmitter for QueueEmitter {
    async fn stream_processed(
        &self,
        tenant_id: Uuid,
        platform: &str,
        run_id: Uuid,
    ) -> MessagingResult<()> {
        let message = RunWorkerMessage::StreamProcessed {
            tenant_id,
            platform: platform.to_string(),
            run_id,
        };
        self.send(&self.queues.run_queue, &message).await
    }
}

#[async_trait]
impl DataSinkEmitter for QueueEmitter {
    async fn trigger_result_processing(
        &self,
        tenant_id: Uuid,
        platform: &str,
        result_id: Uuid,
        natural_key: &str,
        onboarding: bool,
    ) -> MessagingResult<()> {
        let message = DataSinkMessage::ProcessIntegrationResult {
            tenant_id,
            platform: platform.to_string(),
            result_id,
            natural_key: natural_key.to_string(),
            onboarding,
        };
        self.send(&self.queues.data_sink_queue, &message).await
    }
}
