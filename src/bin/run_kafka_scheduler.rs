//! Tick hourly on weekdays, publishing one Kafka message per job instead
//! of running the DAG in-process. Pairs with `run-kafka-consumer`, which
//! actually executes the jobs.

use commons_ingestor::bootstrap;
use commons_ingestor::kafka::{self, JobPublisher, KafkaSettings};
use commons_ingestor::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing();

    let config = Config::from_env();
    let pool = bootstrap::connect(&config).await?;
    let runtime = bootstrap::build_runtime(&config, pool);

    let kafka_settings = KafkaSettings::from_env(&config)?;
    let publisher = JobPublisher::new(&kafka_settings)?;
    let time_zone: chrono_tz::Tz = config
        .scheduler_time_zone
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid scheduler time zone: {}", config.scheduler_time_zone))?;

    tracing::info!(
        time_zone = %config.scheduler_time_zone,
        topic = %kafka_settings.jobs_topic,
        "kafka publisher started"
    );
    kafka::run_publisher_loop(runtime.jobs, publisher, time_zone).await;
}
