//! # Stream Maintenance
//!
//! Sweeps that put work back on the queues:
//!
//! - [`StreamMaintenance::check_streams`] resets DELAYED streams and data
//!   units whose delay has passed and re-emits them.
//! - [`StreamMaintenance::continue_processing_run_streams`] re-emits every
//!   PENDING stream and data unit of a run. Data units reset by a rate limit,
//!   or skipped while the run was delayed, are picked up here.
//! - [`StreamMaintenance::reconcile_stale_streams`] and
//!   [`StreamMaintenance::reconcile_stale_data`] reset units left in
//!   PROCESSING by a crashed worker.
//!
//! A unit that fails to reset (typically because another worker moved it) is
//! logged and skipped. A page with no successful reset ends the sweep.

use super::services::WorkerServices;
use crate::constants::system;
use crate::error::Result;
use crate::models::{ProcessableData, ProcessableStream, StreamScope};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub streams_reset: usize,
    pub data_reset: usize,
    pub stale_streams_reset: usize,
    pub stale_data_reset: usize,
}

#[derive(Debug)]
pub struct StreamMaintenance {
    services: WorkerServices,
}

impl StreamMaintenance {
    pub fn new(services: WorkerServices) -> Self {
        Self { services }
    }

    fn batch_size(&self) -> i64 {
        self.services.config.delayed_stream_batch_size.max(1)
    }

    /// Reset and re-emit delayed streams and data units that are due
    #[instrument(skip(self))]
    pub async fn check_streams(&self) -> Result<MaintenanceReport> {
        let batch_size = self.batch_size();
        let mut report = MaintenanceReport::default();

        loop {
            let page = self
                .services
                .store
                .get_ready_delayed_streams(Utc::now(), batch_size)
                .await?;
            let mut reset = 0;
            for stream in &page {
                match self.reset_stream(stream).await {
                    Ok(()) => reset += 1,
                    Err(err) => warn!(stream_id = %stream.id, error = %err, "Failed to reset delayed stream"),
                }
            }
            report.streams_reset += reset;
            if reset == 0 || (page.len() as i64) < batch_size {
                break;
            }
        }

        loop {
            let page = self
                .services
                .store
                .get_ready_delayed_data(Utc::now(), batch_size)
                .await?;
            let mut reset = 0;
            for unit in &page {
                match self.reset_data(unit).await {
                    Ok(()) => reset += 1,
                    Err(err) => warn!(data_id = %unit.id, error = %err, "Failed to reset delayed data unit"),
                }
            }
            report.data_reset += reset;
            if reset == 0 || (page.len() as i64) < batch_size {
                break;
            }
        }

        info!(
            streams_reset = report.streams_reset,
            data_reset = report.data_reset,
            "Delayed units reset"
        );
        Ok(report)
    }

    /// Re-emit every PENDING stream and data unit of `run_id`; returns how
    /// many were emitted
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn continue_processing_run_streams(&self, run_id: Uuid) -> Result<usize> {
        let streams = self.continue_run_streams(run_id).await?;
        let data = self.continue_run_data(run_id).await?;

        info!(streams, data, "Pending run units re-emitted");
        Ok(streams + data)
    }

    async fn continue_run_streams(&self, run_id: Uuid) -> Result<usize> {
        let page_size = system::CONTINUE_RUN_STREAMS_PAGE_SIZE;
        let mut after = None;
        let mut emitted = 0;

        loop {
            let page = self
                .services
                .store
                .get_pending_run_streams(run_id, after, page_size)
                .await?;

            for stream in &page {
                self.emit_stream(stream).await?;
                emitted += 1;
            }

            match page.last() {
                Some(last) if page.len() as i64 == page_size => after = Some(last.id),
                _ => break,
            }
        }

        Ok(emitted)
    }

    async fn continue_run_data(&self, run_id: Uuid) -> Result<usize> {
        let page_size = system::CONTINUE_RUN_DATA_PAGE_SIZE;
        let mut after = None;
        let mut emitted = 0;

        loop {
            let page = self
                .services
                .store
                .get_pending_run_data(run_id, after, page_size)
                .await?;

            for unit in &page {
                self.emit_data(unit).await?;
                emitted += 1;
            }

            match page.last() {
                Some(last) if page.len() as i64 == page_size => after = Some(last.id),
                _ => break,
            }
        }

        Ok(emitted)
    }

    /// Reset PROCESSING streams older than the processing timeout
    #[instrument(skip(self))]
    pub async fn reconcile_stale_streams(&self) -> Result<usize> {
        let batch_size = self.batch_size();
        let older_than = Utc::now() - self.services.config.processing_timeout();
        let mut total = 0;

        loop {
            let page = self
                .services
                .store
                .get_stale_processing_streams(older_than, batch_size)
                .await?;
            let mut reset = 0;
            for stream in &page {
                match self.reset_stream(stream).await {
                    Ok(()) => reset += 1,
                    Err(err) => warn!(stream_id = %stream.id, error = %err, "Failed to reset stale stream"),
                }
            }
            total += reset;
            if reset == 0 || (page.len() as i64) < batch_size {
                break;
            }
        }

        if total > 0 {
            warn!(reset = total, "Reset streams abandoned in PROCESSING");
        }
        Ok(total)
    }

    /// Reset PROCESSING data units older than the processing timeout
    #[instrument(skip(self))]
    pub async fn reconcile_stale_data(&self) -> Result<usize> {
        let batch_size = self.batch_size();
        let older_than = Utc::now() - self.services.config.processing_timeout();
        let mut total = 0;

        loop {
            let page = self
                .services
                .store
                .get_stale_processing_data(older_than, batch_size)
                .await?;
            let mut reset = 0;
            for unit in &page {
                match self.reset_data(unit).await {
                    Ok(()) => reset += 1,
                    Err(err) => warn!(data_id = %unit.id, error = %err, "Failed to reset stale data unit"),
                }
            }
            total += reset;
            if reset == 0 || (page.len() as i64) < batch_size {
                break;
            }
        }

        if total > 0 {
            warn!(reset = total, "Reset data units abandoned in PROCESSING");
        }
        Ok(total)
    }

    async fn reset_stream(&self, stream: &ProcessableStream) -> Result<()> {
        self.services.store.reset_stream(stream.id).await?;
        self.emit_stream(stream).await
    }

    async fn emit_stream(&self, stream: &ProcessableStream) -> Result<()> {
        let emitter = &self.services.stream_emitter;
        match stream.scope {
            StreamScope::Run { .. } => {
                emitter
                    .trigger_stream_processing(
                        stream.tenant_id,
                        &stream.platform,
                        stream.id,
                        stream.onboarding.unwrap_or(false),
                    )
                    .await?
            }
            StreamScope::Webhook { webhook_id } => {
                emitter
                    .trigger_webhook_processing(stream.tenant_id, &stream.platform, webhook_id)
                    .await?
            }
        }
        Ok(())
    }

    async fn reset_data(&self, unit: &ProcessableData) -> Result<()> {
        self.services.store.reset_data(unit.id).await?;
        self.emit_data(unit).await
    }

    async fn emit_data(&self, unit: &ProcessableData) -> Result<()> {
        self.services
            .data_emitter
            .trigger_data_processing(unit.tenant_id, &unit.platform, unit.id)
            .await?;
        Ok(())
    }
}
