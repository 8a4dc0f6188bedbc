use std::time::Duration;

use comply_core::config::PostgresConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};

/// Create a PostgreSQL connection pool.
///
/// Connection failures surface as [`StoreError::Unavailable`] so callers can
/// retry instead of treating them as fatal.
pub async fn connect(config: &PostgresConfig) -> StoreResult<PgPool> {
    if !config.is_configured() {
        warn!("PG_USERNAME not configured, refusing to connect");
        return Err(StoreError::Unavailable(
            "PostgreSQL is not configured (set PG_USERNAME)".to_string(),
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.connection_string())
        .await
        .map_err(|e| StoreError::Unavailable(format!("{}: {}", config.host, e)))?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");
    Ok(pool)
}

/// Apply every pending migration under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}
