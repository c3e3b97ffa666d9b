//! Run the job DAG once for the current hourly window and exit.
//!
//! Intended for cron-style invocation or manual backfill of a single
//! window; does not start the weekday scheduler.

use commons_ingestor::bootstrap;
use commons_ingestor::coordinator::{self, CoordinatorOptions};
use commons_ingestor::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing();

    let config = Config::from_env();
    let pool = bootstrap::connect(&config).await?;
    let runtime = bootstrap::build_runtime(&config, pool);

    let window_start = coordinator::current_window_start();
    tracing::info!(%window_start, "running hourly window once");

    let results = coordinator::run_window(
        runtime.jobs,
        runtime.checkpoint_store,
        window_start,
        CoordinatorOptions {
            max_workers: config.scheduler_max_workers,
            ..Default::default()
        },
    )
    .await;

    for (job_name, result) in &results {
        tracing::info!(
            job = %job_name,
            status = ?result.status,
            attempt = result.attempt,
            duration_seconds = result.duration_seconds,
            "job finished"
        );
    }

    std::process::exit(bootstrap::exit_code_for(&results));
}
