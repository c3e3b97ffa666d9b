//! Start the weekday hourly scheduler and run it as a long-lived
//! process, shutting down cleanly on SIGINT/SIGTERM.

use commons_ingestor::bootstrap;
use commons_ingestor::scheduler;
use commons_ingestor::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing();

    let config = Config::from_env();
    let pool = bootstrap::connect(&config).await?;
    let runtime = bootstrap::build_runtime(&config, pool);

    scheduler::start(
        runtime.jobs,
        runtime.checkpoint_store,
        &config.scheduler_time_zone,
        config.scheduler_max_workers,
    )?;
    tracing::info!(time_zone = %config.scheduler_time_zone, "hourly scheduler started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        _ = scheduler::wait_forever() => {}
    }

    scheduler::shutdown();
    Ok(())
}
