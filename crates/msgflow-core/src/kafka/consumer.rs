//! Consumer-group member feeding the analytics consumer.
//!
//! Offsets are committed manually, one record at a time, after the record's
//! insert cycle has finished.

use super::base_client_config;
use crate::config::KafkaConfig;
use crate::model::LogRecord;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source of log records for the analytics consumer.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Confirm the broker answers before the consumer enters its loop.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// Wait up to `wait` for the next record. `Ok(None)` means nothing arrived.
    async fn fetch(&mut self, wait: Duration) -> Result<Option<LogRecord>>;

    /// Mark `record` as processed for the consumer group.
    async fn commit(&mut self, record: &LogRecord) -> Result<()>;

    /// Topic this source is subscribed to.
    fn subscription(&self) -> &str;
}

/// Builder for [`KafkaRecordSource`].
pub struct KafkaRecordSourceBuilder {
    config: KafkaConfig,
}

impl KafkaRecordSourceBuilder {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Create the consumer and subscribe to the configured topic.
    pub fn build(self) -> Result<KafkaRecordSource> {
        let mut client_config = base_client_config(&self.config);
        client_config
            .set("group.id", &self.config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            // must exceed the longest insert cycle (deadline plus backoff)
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky");

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(KafkaRecordSource {
            consumer: Arc::new(consumer),
            topic: self.config.topic,
            brokers: self.config.bootstrap_servers.join(","),
        })
    }
}

/// Kafka-backed [`RecordSource`].
pub struct KafkaRecordSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
    brokers: String,
}

impl KafkaRecordSource {
    fn convert_message(msg: &BorrowedMessage<'_>) -> LogRecord {
        LogRecord {
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|v| v.to_vec()).unwrap_or_default(),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp_ms: msg.timestamp().to_millis(),
        }
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn probe(&self) -> Result<()> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            consumer.fetch_metadata(Some(&topic), Duration::from_secs(10))
        })
        .await
        .map_err(|e| Error::Kafka(KafkaError::Metadata(e.to_string())))?
        .map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.brokers.clone(),
                message: e.to_string(),
            })
        })?;
        Ok(())
    }

    async fn fetch(&mut self, wait: Duration) -> Result<Option<LogRecord>> {
        match tokio::time::timeout(wait, self.consumer.recv()).await {
            Ok(Ok(msg)) => Ok(Some(Self::convert_message(&msg))),
            Ok(Err(e)) => Err(Error::Kafka(KafkaError::Fetch(e.to_string()))),
            Err(_) => Ok(None),
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        // committed offset is the next one to read
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Offset committed"
        );
        Ok(())
    }

    fn subscription(&self) -> &str {
        &self.topic
    }
}
