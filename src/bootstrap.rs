//! Shared wiring for the CLI binaries in `src/bin/`: tracing
//! initialization, the Postgres pool, and the store/job-graph assembly
//! every binary needs. Keeping it here means the five `[[bin]]` targets
//! stay thin and in sync with each other.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::checkpoint::postgres::PgCheckpointStore;
use crate::checkpoint::CheckpointStore;
use crate::config::{mask_database_url, Config};
use crate::http::fetch_log::postgres::PgFetchLogStore;
use crate::http::fetch_log::FetchLogStore;
use crate::jobs::definitions::{default_job_definitions, JobContext};
use crate::jobs::Job;
use crate::watermark::postgres::PgWatermarkStore;
use crate::watermark::WatermarkStore;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

pub async fn connect(config: &Config) -> anyhow::Result<sqlx::PgPool> {
    tracing::info!(database_url = %mask_database_url(&config.database_url), "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_connect_timeout)
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}

/// Everything a binary needs to run the job DAG once the database pool is
/// open: the assembled jobs plus the checkpoint store the coordinator
/// drives them through.
pub struct Runtime {
    pub jobs: Vec<Job>,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
}

pub fn build_runtime(config: &Config, pool: sqlx::PgPool) -> Runtime {
    let watermark_store: Arc<dyn WatermarkStore> = Arc::new(PgWatermarkStore::new(pool.clone()));
    let fetch_log_store: Arc<dyn FetchLogStore> = Arc::new(PgFetchLogStore::new(pool.clone()));
    let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(PgCheckpointStore::new(pool));

    let ctx = Arc::new(JobContext::new(
        watermark_store,
        fetch_log_store,
        config.current_parliament,
        config.current_session,
    ));
    let jobs = default_job_definitions(ctx);

    Runtime {
        jobs,
        checkpoint_store,
    }
}

/// Exit code convention shared by every binary: 0 when every job
/// succeeded or was cleanly skipped, 1 when at least one job failed.
pub fn exit_code_for(results: &std::collections::HashMap<String, crate::coordinator::JobResult>) -> i32 {
    let failed = results
        .values()
        .filter(|r| r.status == crate::coordinator::JobStatus::Failed)
        .count();
    if failed > 0 {
        tracing::error!(failed_jobs = failed, "window completed with failures");
        1
    } else {
        0
    }
}
