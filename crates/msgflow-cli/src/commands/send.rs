//! Send command: one write through the ingress writer.

use anyhow::Result;
use msgflow_core::ingress::IngressWriter;
use msgflow_core::kafka::KafkaEventLog;
use msgflow_core::metrics::PipelineMetrics;
use msgflow_core::model::NewMessage;
use msgflow_core::realtime::MqttPublisher;
use msgflow_core::relational::PgMessageStore;
use msgflow_core::Config;
use std::sync::Arc;
use tracing::{info, warn};

/// Persist a message, fan it out and print the stored row as JSON.
pub async fn run(config: Config, topic: String, sender: String, content: String) -> Result<()> {
    let store = PgMessageStore::connect(&config.postgres).await?;
    store.bootstrap().await?;

    let publisher = Arc::new(MqttPublisher::connect(&config.mqtt).map_err(msgflow_core::Error::from)?);
    let log = KafkaEventLog::connect(&config.kafka).await?;
    let metrics = Arc::new(PipelineMetrics::new());

    let writer = IngressWriter::new(
        Arc::new(store),
        publisher.clone(),
        Arc::new(log),
        &config.ingress,
        Arc::clone(&metrics),
    );

    let result = writer.write(NewMessage::new(topic, sender, content)).await;

    let report = writer.shutdown().await;
    if report.lost > 0 || report.timed_out {
        warn!(lost = report.lost, timed_out = report.timed_out, "Analytics events not drained");
    }
    drop(writer);

    if let Ok(publisher) = Arc::try_unwrap(publisher) {
        publisher.shutdown().await;
    }

    let message = result?;
    info!(
        id = message.id,
        emitted = metrics.events_emitted_total(),
        "Message written"
    );
    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}
