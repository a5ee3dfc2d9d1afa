//! Alaska work registry.
//!
//! Durable storage for analyses, projects, samples, genome references and
//! the job queue.
//! Callers program against the [`WorkRegistry`] trait; [`PgRegistry`] is the
//! production implementation backed by Postgres and [`MemoryRegistry`] keeps
//! everything in process for tests and local runs.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod registry;
pub mod repositories;
pub mod retry;

use sqlx::postgres::PgPoolOptions;

pub use error::RegistryError;
pub use memory::MemoryRegistry;
pub use postgres::PgRegistry;
pub use registry::WorkRegistry;
pub use retry::RetryPolicy;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply any pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
