//! # Schema Migrations
//!
//! Migrations live in `migrations/` using the `YYYYMMDDHHMMSS_description.sql`
//! naming convention and are embedded at compile time. The sqlx migrator
//! takes a PostgreSQL advisory lock, so concurrent workers starting at the
//! same time apply each migration exactly once.

use crate::error::{IntegrationStreamError, Result};
use sqlx::PgPool;
use tracing::info;

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every outstanding migration in version order
    pub async fn run_all(pool: &PgPool) -> Result<()> {
        let migrator = sqlx::migrate!("./migrations");
        info!(
            migrations = migrator.iter().count(),
            "Applying integration stream schema migrations"
        );

        migrator
            .run(pool)
            .await
            .map_err(|e| IntegrationStreamError::DatabaseError(format!("Migration failed: {e}")))
    }
}
