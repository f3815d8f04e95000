//! # Integration Stream Worker
//!
//! Runs the stream and data stages against Postgres and pgmq until Ctrl-C.
//! Configuration comes from `config/integration-stream.yaml` (or
//! `INTEGRATION_STREAM_CONFIG_PATH`) and `INTEGRATION_STREAM__*` variables.
//!
//! Platform processors are registered by the embedding deployment; a bare
//! worker consumes messages and records a `no_processor` error on every unit.

use anyhow::Context;
use integration_stream::cache::MemoryCache;
use integration_stream::config::WorkerConfig;
use integration_stream::database::{DatabaseConnection, DatabaseMigrations, PgStreamStore};
use integration_stream::logging::init_structured_logging;
use integration_stream::messaging::{PgmqTransport, QueueEmitter, QueueTransport};
use integration_stream::orchestration::{StreamWorker, WorkerServices};
use integration_stream::registry::ProcessorRegistry;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config = WorkerConfig::load().context("loading worker configuration")?;
    config.validate().context("validating worker configuration")?;

    let max_connections = u32::try_from(config.max_concurrent_invocations + 2).unwrap_or(u32::MAX);
    let connection = DatabaseConnection::connect_with(&config.database_url, max_connections)
        .await
        .context("connecting to database")?;
    if !connection.health_check().await? {
        anyhow::bail!("database health check failed");
    }
    DatabaseMigrations::run_all(connection.pool())
        .await
        .context("running migrations")?;

    let pool = connection.pool().clone();
    let transport: Arc<dyn QueueTransport> = Arc::new(PgmqTransport::new(pool.clone()));
    let emitter = Arc::new(QueueEmitter::new(transport.clone(), config.queues.clone()));
    emitter
        .ensure_queues()
        .await
        .context("creating worker queues")?;

    let registry = Arc::new(ProcessorRegistry::new());
    if registry.platforms().is_empty() {
        warn!("No platform processors registered");
    }

    let services = WorkerServices::with_emitter(
        Arc::new(PgStreamStore::new(pool)),
        emitter,
        Arc::new(MemoryCache::new()),
        registry,
        Arc::new(config),
    );
    let worker = StreamWorker::new(services, transport);

    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await?;

    connection.close().await;
    Ok(())
}
