//! Connection pool and embedded migrations

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{db_err, BillingError, BillingResult};

/// Build the PostgreSQL pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> BillingResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(db_err)
}

/// Apply the billing schema migrations
pub async fn run_migrations(pool: &PgPool) -> BillingResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BillingError::Database(format!("Migration failed: {}", e)))?;
    tracing::info!("Billing migrations applied");
    Ok(())
}
