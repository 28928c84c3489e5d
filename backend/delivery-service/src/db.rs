use crate::config::DatabaseConfig;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect, verify with `SELECT 1`, then apply pending migrations.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    match tokio::time::timeout(VERIFY_TIMEOUT, sqlx::query("SELECT 1").execute(&pool)).await {
        Ok(Ok(_)) => info!("Database pool created and verified"),
        Ok(Err(e)) => {
            error!(error = %e, "Database connection verification failed");
            return Err(e);
        }
        Err(_) => {
            error!(timeout_secs = VERIFY_TIMEOUT.as_secs(), "Database connection verification timeout");
            return Err(sqlx::Error::PoolTimedOut);
        }
    }

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
