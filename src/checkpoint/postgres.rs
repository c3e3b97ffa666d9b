//! Postgres-backed [`CheckpointStore`], persisting to an `etl_job_checkpoint`
//! table shaped like:
//!
//! ```sql
//! CREATE TABLE etl_job_checkpoint (
//!     job_name             TEXT PRIMARY KEY,
//!     last_window_start    TIMESTAMPTZ,
//!     last_started_at      TIMESTAMPTZ,
//!     last_completed_at    TIMESTAMPTZ,
//!     last_attempt         INTEGER NOT NULL DEFAULT 0,
//!     status               TEXT NOT NULL DEFAULT 'idle',
//!     last_error           TEXT NOT NULL DEFAULT '',
//!     last_duration_seconds DOUBLE PRECISION,
//!     created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at           TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! Every mutation acquires the row with `FOR UPDATE` inside a transaction so
//! concurrent coordinators never interleave a read-modify-write cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{truncate_error, Checkpoint, CheckpointStatus, CheckpointStore, PreparedRun};
use crate::error::IngestError;

pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn status_str(status: CheckpointStatus) -> &'static str {
        match status {
            CheckpointStatus::Idle => "idle",
            CheckpointStatus::Running => "running",
            CheckpointStatus::Success => "success",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Skipped => "skipped",
        }
    }

    fn parse_status(value: &str) -> CheckpointStatus {
        match value {
            "running" => CheckpointStatus::Running,
            "success" => CheckpointStatus::Success,
            "failed" => CheckpointStatus::Failed,
            "skipped" => CheckpointStatus::Skipped,
            _ => CheckpointStatus::Idle,
        }
    }

    async fn load_for_update(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_name: &str,
    ) -> Result<Checkpoint, IngestError> {
        sqlx::query(
            "INSERT INTO etl_job_checkpoint (job_name) VALUES ($1) \
             ON CONFLICT (job_name) DO NOTHING",
        )
        .bind(job_name)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(
            "SELECT last_window_start, last_started_at, last_completed_at, last_attempt, \
                    status, last_error, last_duration_seconds \
             FROM etl_job_checkpoint WHERE job_name = $1 FOR UPDATE",
        )
        .bind(job_name)
        .fetch_one(&mut **tx)
        .await?;

        let status: String = row.try_get("status")?;
        let last_attempt: i32 = row.try_get("last_attempt")?;

        Ok(Checkpoint {
            job_name: job_name.to_string(),
            last_window_start: row.try_get("last_window_start")?,
            last_started_at: row.try_get("last_started_at")?,
            last_completed_at: row.try_get("last_completed_at")?,
            last_attempt: last_attempt.max(0) as u32,
            status: Self::parse_status(&status),
            last_error: row.try_get("last_error")?,
            last_duration_seconds: row.try_get("last_duration_seconds")?,
        })
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn prepare_run(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
    ) -> Result<PreparedRun, IngestError> {
        let mut tx = self.pool.begin().await?;
        let checkpoint = Self::load_for_update(&mut tx, job_name).await?;

        if checkpoint.last_window_start == Some(window_start)
            && checkpoint.status == CheckpointStatus::Success
        {
            tx.commit().await?;
            return Ok(PreparedRun {
                run_required: false,
                attempt: checkpoint.last_attempt.max(1),
            });
        }

        let attempt = if checkpoint.last_window_start == Some(window_start) {
            checkpoint.last_attempt + 1
        } else {
            1
        };

        sqlx::query(
            "UPDATE etl_job_checkpoint \
             SET last_window_start = $2, last_started_at = now(), last_attempt = $3, \
                 status = $4, last_error = '', last_duration_seconds = NULL, updated_at = now() \
             WHERE job_name = $1",
        )
        .bind(job_name)
        .bind(window_start)
        .bind(attempt as i32)
        .bind(Self::status_str(CheckpointStatus::Running))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PreparedRun {
            run_required: true,
            attempt,
        })
    }

    async fn prepare_retry(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
        attempt: u32,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;
        Self::load_for_update(&mut tx, job_name).await?;

        sqlx::query(
            "UPDATE etl_job_checkpoint \
             SET last_window_start = $2, last_started_at = now(), last_attempt = $3, \
                 status = $4, last_error = '', updated_at = now() \
             WHERE job_name = $1",
        )
        .bind(job_name)
        .bind(window_start)
        .bind(attempt as i32)
        .bind(Self::status_str(CheckpointStatus::Running))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_success(
        &self,
        job_name: &str,
        attempt: u32,
        duration_seconds: f64,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;
        Self::load_for_update(&mut tx, job_name).await?;

        sqlx::query(
            "UPDATE etl_job_checkpoint \
             SET last_completed_at = now(), last_attempt = $2, status = $3, \
                 last_error = '', last_duration_seconds = $4, updated_at = now() \
             WHERE job_name = $1",
        )
        .bind(job_name)
        .bind(attempt as i32)
        .bind(Self::status_str(CheckpointStatus::Success))
        .bind(duration_seconds)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(job_name, attempt, duration_seconds, "job succeeded");
        Ok(())
    }

    async fn record_attempt_failure(
        &self,
        job_name: &str,
        attempt: u32,
        duration_seconds: f64,
        error: &str,
        final_attempt: bool,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;
        Self::load_for_update(&mut tx, job_name).await?;

        let truncated = truncate_error(error);
        if final_attempt {
            sqlx::query(
                "UPDATE etl_job_checkpoint \
                 SET last_attempt = $2, last_error = $3, last_duration_seconds = $4, \
                     last_completed_at = now(), status = $5, updated_at = now() \
                 WHERE job_name = $1",
            )
            .bind(job_name)
            .bind(attempt as i32)
            .bind(&truncated)
            .bind(duration_seconds)
            .bind(Self::status_str(CheckpointStatus::Failed))
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE etl_job_checkpoint \
                 SET last_attempt = $2, last_error = $3, last_duration_seconds = $4, updated_at = now() \
                 WHERE job_name = $1",
            )
            .bind(job_name)
            .bind(attempt as i32)
            .bind(&truncated)
            .bind(duration_seconds)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        if final_attempt {
            tracing::error!(job_name, attempt, "job failed after final attempt");
        }
        Ok(())
    }

    async fn mark_skipped(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await?;
        Self::load_for_update(&mut tx, job_name).await?;

        let message = format!("Skipped due to unmet dependencies: {reason}");
        sqlx::query(
            "UPDATE etl_job_checkpoint \
             SET last_window_start = $2, last_started_at = now(), last_completed_at = now(), \
                 last_attempt = 0, status = $3, last_error = $4, last_duration_seconds = 0.0, \
                 updated_at = now() \
             WHERE job_name = $1",
        )
        .bind(job_name)
        .bind(window_start)
        .bind(Self::status_str(CheckpointStatus::Skipped))
        .bind(&message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::warn!(job_name, reason, "job skipped");
        Ok(())
    }

    async fn get(&self, job_name: &str) -> Result<Checkpoint, IngestError> {
        let mut tx = self.pool.begin().await?;
        let checkpoint = Self::load_for_update(&mut tx, job_name).await?;
        tx.commit().await?;
        Ok(checkpoint)
    }
}
