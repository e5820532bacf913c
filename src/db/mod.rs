use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::PoolSettings;

pub mod queries;

pub use queries::PgJobStore;

/// Connect a pool sized by `settings`. Idle connections are recycled after
/// ten minutes and every connection after half an hour.
pub async fn init_pool(database_url: &str, settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    tracing::debug!(
        max = settings.max_connections,
        min = settings.min_connections,
        "Opening PostgreSQL pool"
    );
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Create the `analysis_jobs` table and indexes if missing.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
