//! Connection pools and embedded migrations for the Main and Ephemeral stores.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(name: &str, config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(store = name, "Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!(store = name, "Successfully connected to PostgreSQL");

    Ok(pool)
}

pub async fn run_main_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!(store = "main", "Running database migrations...");
    sqlx::migrate!("./migrations/main").run(pool).await?;
    tracing::info!(store = "main", "Database migrations completed");
    Ok(())
}

pub async fn run_ephemeral_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!(store = "ephemeral", "Running database migrations...");
    sqlx::migrate!("./migrations/ephemeral").run(pool).await?;
    tracing::info!(store = "ephemeral", "Database migrations completed");
    Ok(())
}
