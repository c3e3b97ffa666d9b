//! Re-dispatch the current window's jobs onto Kafka, skipping weekends.
//! Safe to invoke from cron alongside `run-kafka-scheduler` as a catch-up
//! in case that process's own tick was missed (e.g. after a restart); the
//! weekday gate keeps it a no-op most of the time.

use commons_ingestor::coordinator::current_window_start;
use commons_ingestor::kafka::{self, JobPublisher, KafkaSettings};
use commons_ingestor::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    commons_ingestor::bootstrap::init_tracing();

    let config = Config::from_env();
    let pool = commons_ingestor::bootstrap::connect(&config).await?;
    let runtime = commons_ingestor::bootstrap::build_runtime(&config, pool);

    let kafka_settings = KafkaSettings::from_env(&config)?;
    let publisher = JobPublisher::new(&kafka_settings)?;

    let window_start = current_window_start();
    let dispatched = kafka::run_fallback(&runtime.jobs, &publisher, window_start).await?;

    if dispatched {
        tracing::info!(%window_start, "fallback dispatch completed");
    } else {
        tracing::debug!(%window_start, "fallback dispatch skipped (weekend)");
    }

    Ok(())
}
