//! Storage adapters for the vitals pipeline.
//!
//! - [`repositories::AlertRepo`]: the `alerts` table in PostgreSQL (sqlx).
//! - [`influx::InfluxClient`]: the `vitals` measurement in InfluxDB, written
//!   with the HTTP line protocol.

pub mod influx;
pub mod models;
pub mod repositories;

use sqlx::postgres::PgPoolOptions;

pub use influx::{InfluxClient, InfluxConfig, InfluxError};
pub use repositories::{AlertRepo, PgAlertRepository};

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
