//! Postgres-backed [`WatermarkStore`], persisting to an `etl_job_watermark`
//! table shaped like:
//!
//! ```sql
//! CREATE TABLE etl_job_watermark (
//!     job_name    TEXT PRIMARY KEY,
//!     last_token  TEXT,
//!     last_timestamp TIMESTAMPTZ,
//!     metadata    JSONB NOT NULL DEFAULT '{}',
//!     created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use super::{apply_update, Watermark, WatermarkStore, WatermarkUpdate};
use crate::error::IngestError;

pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_for_update(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_name: &str,
    ) -> Result<Watermark, IngestError> {
        sqlx::query(
            "INSERT INTO etl_job_watermark (job_name) VALUES ($1) \
             ON CONFLICT (job_name) DO NOTHING",
        )
        .bind(job_name)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(
            "SELECT last_token, last_timestamp, metadata FROM etl_job_watermark \
             WHERE job_name = $1 FOR UPDATE",
        )
        .bind(job_name)
        .fetch_one(&mut **tx)
        .await?;

        let metadata: Value = row.try_get("metadata")?;
        Ok(Watermark {
            token: row.try_get("last_token")?,
            timestamp: row.try_get("last_timestamp")?,
            metadata: metadata
                .as_object()
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn get(&self, job_name: &str) -> Result<Watermark, IngestError> {
        let mut tx = self.pool.begin().await?;
        let watermark = Self::load_for_update(&mut tx, job_name).await?;
        tx.commit().await?;
        Ok(watermark)
    }

    async fn update(
        &self,
        job_name: &str,
        update: WatermarkUpdate,
    ) -> Result<Watermark, IngestError> {
        let mut tx = self.pool.begin().await?;
        let current = Self::load_for_update(&mut tx, job_name).await?;
        let next = apply_update(&current, &update);

        if next != current {
            sqlx::query(
                "UPDATE etl_job_watermark \
                 SET last_token = $2, last_timestamp = $3, metadata = $4, updated_at = now() \
                 WHERE job_name = $1",
            )
            .bind(job_name)
            .bind(&next.token)
            .bind(next.timestamp)
            .bind(Value::Object(next.metadata.clone()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(next)
    }
}
