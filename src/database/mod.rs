//! # Database Operations
//!
//! Persistence for integrations, runs, streams, data units, results and
//! webhooks.
//!
//! ## Key Components
//!
//! - [`store`] - the [`StreamStore`] contract the orchestrators depend on
//! - [`postgres`] - SQLx/PostgreSQL implementation
//! - [`memory`] - in-process implementation with identical semantics, for
//!   tests and local runs
//! - [`connection`] / [`migrations`] - pool setup and schema migrations
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use integration_stream::database::{DatabaseConnection, DatabaseMigrations, PgStreamStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect("postgresql://localhost/integration_stream").await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! let store = PgStreamStore::new(db.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod store;

pub use connection::DatabaseConnection;
pub use memory::InMemoryStreamStore;
pub use migrations::DatabaseMigrations;
pub use postgres::PgStreamStore;
pub use store::StreamStore;
