use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::AppConfig;

/// Idempotent schema for users, posts, comments and likes.
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Upper bound on a health probe, independent of the pool's acquire timeout.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.db_idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.db_max_lifetime_seconds))
            .connect(&config.database_url)
            .await
            .context("failed to connect to postgres")?;

        tracing::info!(
            max_connections = config.db_max_connections,
            "database pool ready"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates any missing tables and indexes. Safe to run on every start.
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| anyhow!("database ping timed out after {:?}", PING_TIMEOUT))??;
        Ok(())
    }
}
