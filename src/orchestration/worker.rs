//! # Stream Worker
//!
//! Queue consumer for the stream and data stages. Reads batches from the
//! stream and data queues, dispatches each message to the orchestrator,
//! transformer or maintenance sweeps, and bounds in-flight invocations with a
//! semaphore sized by `max_concurrent_invocations`.
//!
//! A message is deleted once it has been handled, including when the unit
//! was skipped or its failure was recorded by the retry policy. Unknown
//! message types and any error returned by a handler leave it on the queue,
//! so the transport's redelivery and dead-letter policy takes over.

use super::data_transformer::DataTransformer;
use super::maintenance::{MaintenanceReport, StreamMaintenance};
use super::outcome::InvocationOutcome;
use super::services::WorkerServices;
use super::stream_orchestrator::StreamOrchestrator;
use crate::error::{IntegrationStreamError, Result};
use crate::messaging::{MessageLease, QueueMessage, QueueTransport, WorkerMessage};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum HandledMessage {
    Stream(InvocationOutcome),
    Data(InvocationOutcome),
    Maintenance(MaintenanceReport),
    RunStreamsContinued(usize),
}

pub struct StreamWorker {
    services: WorkerServices,
    transport: Arc<dyn QueueTransport>,
    orchestrator: StreamOrchestrator,
    transformer: DataTransformer,
    maintenance: StreamMaintenance,
    /// Bounds concurrently running invocations in this process
    invocation_semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for StreamWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWorker")
            .field("services", &self.services)
            .field(
                "available_permits",
                &self.invocation_semaphore.available_permits(),
            )
            .finish()
    }
}

impl StreamWorker {
    pub fn new(services: WorkerServices, transport: Arc<dyn QueueTransport>) -> Self {
        let permits = services.config.max_concurrent_invocations.max(1);
        Self {
            orchestrator: StreamOrchestrator::new(services.clone()),
            transformer: DataTransformer::new(services.clone()),
            maintenance: StreamMaintenance::new(services.clone()),
            invocation_semaphore: Arc::new(Semaphore::new(permits)),
            services,
            transport,
        }
    }

    pub fn orchestrator(&self) -> &StreamOrchestrator {
        &self.orchestrator
    }

    pub fn transformer(&self) -> &DataTransformer {
        &self.transformer
    }

    pub fn maintenance(&self) -> &StreamMaintenance {
        &self.maintenance
    }

    /// Dispatch one parsed message
    #[instrument(skip(self, lease), fields(message_type = message.message_type()))]
    pub async fn handle_message(
        &self,
        message: &WorkerMessage,
        lease: Option<MessageLease>,
    ) -> Result<HandledMessage> {
        let _permit = self.invocation_semaphore.acquire().await.map_err(|e| {
            IntegrationStreamError::OrchestrationError(format!(
                "Failed to acquire invocation permit: {e}"
            ))
        })?;

        match message {
            WorkerMessage::ProcessStream { stream_id, .. } => self
                .orchestrator
                .process_stream(*stream_id, lease)
                .await
                .map(HandledMessage::Stream),
            WorkerMessage::ProcessWebhookStream { webhook_id, .. } => self
                .orchestrator
                .process_webhook_stream(*webhook_id, lease)
                .await
                .map(HandledMessage::Stream),
            WorkerMessage::ProcessData { data_id, .. } => self
                .transformer
                .process_data(*data_id)
                .await
                .map(HandledMessage::Data),
            WorkerMessage::CheckStreams => {
                let mut report = self.maintenance.check_streams().await?;
                report.stale_streams_reset = self.maintenance.reconcile_stale_streams().await?;
                report.stale_data_reset = self.maintenance.reconcile_stale_data().await?;
                Ok(HandledMessage::Maintenance(report))
            }
            WorkerMessage::ContinueProcessingRunStreams { run_id } => self
                .maintenance
                .continue_processing_run_streams(*run_id)
                .await
                .map(HandledMessage::RunStreamsContinued),
        }
    }

    /// Parse, handle and acknowledge one queue message
    pub async fn process_queue_message(
        &self,
        queue: &str,
        message: QueueMessage,
    ) -> Result<HandledMessage> {
        let parsed = match WorkerMessage::parse(&message.message) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(
                    queue,
                    msg_id = message.msg_id,
                    payload = %message.message,
                    error = %err,
                    "Unsupported worker message"
                );
                return Err(err.into());
            }
        };

        let lease = MessageLease::new(self.transport.clone(), queue, message.msg_id);
        let handled = match self.handle_message(&parsed, Some(lease)).await {
            Ok(handled) => handled,
            Err(err) => {
                error!(
                    queue,
                    msg_id = message.msg_id,
                    read_ct = message.read_ct,
                    message_type = parsed.message_type(),
                    fatal = err.is_fatal(),
                    error = %err,
                    "Message handling failed, leaving it for redelivery"
                );
                return Err(err);
            }
        };

        self.transport.delete(queue, message.msg_id).await?;
        debug!(queue, msg_id = message.msg_id, "Message acknowledged");
        Ok(handled)
    }

    /// Read one batch from `queue` and handle it concurrently. Returns the
    /// number of messages read.
    pub async fn poll_once(&self, queue: &str) -> Result<usize> {
        let queues = &self.services.config.queues;
        let messages = self
            .transport
            .read(queue, queues.visibility_timeout_seconds, queues.batch_size)
            .await?;
        let count = messages.len();
        if count == 0 {
            return Ok(0);
        }

        let results = join_all(
            messages
                .into_iter()
                .map(|message| self.process_queue_message(queue, message)),
        )
        .await;

        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            warn!(queue, read = count, failed, "Batch finished with failures");
        }
        Ok(count)
    }

    /// Poll the stream and data queues until `shutdown` resolves. In-flight
    /// batches always run to completion.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let queues = &self.services.config.queues;
        let poll_interval = self.services.config.poll_interval();
        tokio::pin!(shutdown);

        info!(
            stream_queue = %queues.stream_queue,
            data_queue = %queues.data_queue,
            max_concurrent = self.services.config.max_concurrent_invocations,
            "Stream worker started"
        );

        loop {
            let mut read = 0;
            for queue in [&queues.stream_queue, &queues.data_queue] {
                match self.poll_once(queue).await {
                    Ok(count) => read += count,
                    Err(err) => error!(queue = %queue, error = %err, "Queue poll failed"),
                }
            }

            let idle = if read == 0 { poll_interval } else { Duration::ZERO };
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }

        info!("Stream worker stopped");
        Ok(())
    }
}
