use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::models::detection::PredictionSummary;

/// Upsert/get of prediction summaries keyed by job id.
///
/// `upsert` must be idempotent: repeating it with identical content is an
/// observational no-op, which is what makes full-restart recovery safe.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<PredictionSummary>, ResultStoreError>;
    async fn upsert(
        &self,
        job_id: &str,
        summary: &PredictionSummary,
    ) -> Result<(), ResultStoreError>;
}

/// Initialize the PostgreSQL connection pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Postgres-backed prediction store; one JSONB document per job id.
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn get(&self, job_id: &str) -> Result<Option<PredictionSummary>, ResultStoreError> {
        let row = sqlx::query("SELECT summary FROM predictions WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let value: serde_json::Value = r.try_get("summary")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert(
        &self,
        job_id: &str,
        summary: &PredictionSummary,
    ) -> Result<(), ResultStoreError> {
        let value = serde_json::to_value(summary)?;
        sqlx::query(
            r#"
            INSERT INTO predictions (id, summary)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET summary = EXCLUDED.summary
            "#,
        )
        .bind(job_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("summary serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
