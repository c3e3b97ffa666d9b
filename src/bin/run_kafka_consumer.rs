//! Consume job messages published by `run-kafka-scheduler` and execute
//! each one through the coordinator's retry executor.

use commons_ingestor::bootstrap;
use commons_ingestor::kafka::{JobConsumer, KafkaSettings};
use commons_ingestor::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing();

    let config = Config::from_env();
    let pool = bootstrap::connect(&config).await?;
    let runtime = bootstrap::build_runtime(&config, pool);

    let kafka_settings = KafkaSettings::from_env(&config)?;
    let consumer = JobConsumer::new(&kafka_settings, runtime.jobs, runtime.checkpoint_store)?;

    tracing::info!(
        group_id = %kafka_settings.group_id,
        topic = %kafka_settings.jobs_topic,
        "kafka consumer started"
    );
    consumer.run().await?;
    Ok(())
}
