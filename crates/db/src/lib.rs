//! PostgreSQL persistence for the inventory reservation core.
//!
//! [`PgInventoryGateway`] implements `boxoffice_core::gateway::InventoryGateway`
//! on top of the zero-sized repositories in [`repositories`].

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod gateway;
pub mod models;
pub mod repositories;

pub use gateway::PgInventoryGateway;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
