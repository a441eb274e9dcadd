//! Append-only producer for analytics events.

use super::base_client_config;
use crate::config::KafkaConfig;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAck {
    pub partition: i32,
    pub offset: i64,
}

/// Append interface to the durable event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, key: &[u8], value: &[u8]) -> Result<LogAck>;
}

/// Routes each record to the partition this producer has written the fewest
/// bytes to. Ties go to the lowest partition id.
#[derive(Debug)]
pub struct LeastBytesBalancer {
    partitions: Vec<i32>,
    bytes: Mutex<Vec<u64>>,
}

impl LeastBytesBalancer {
    pub fn new(mut partitions: Vec<i32>) -> Self {
        partitions.sort_unstable();
        partitions.dedup();
        let bytes = Mutex::new(vec![0; partitions.len()]);
        Self { partitions, bytes }
    }

    /// Pick a partition for a record of `size` bytes and account for it.
    ///
    /// Returns `None` when no partitions are known.
    pub fn pick(&self, size: usize) -> Option<i32> {
        let mut bytes = self.bytes.lock();
        let (idx, _) = bytes.iter().enumerate().min_by_key(|(_, b)| **b)?;
        bytes[idx] += size as u64;
        Some(self.partitions[idx])
    }

    /// Bytes written per partition, in partition order.
    pub fn snapshot(&self) -> Vec<(i32, u64)> {
        let bytes = self.bytes.lock();
        self.partitions.iter().copied().zip(bytes.iter().copied()).collect()
    }
}

/// Kafka-backed [`EventLog`].
pub struct KafkaEventLog {
    topic: String,
    brokers: String,
    producer: FutureProducer,
    balancer: Option<LeastBytesBalancer>,
    delivery_timeout: Duration,
}

// rdkafka's FutureProducer doesn't impl Debug
impl std::fmt::Debug for KafkaEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventLog")
            .field("topic", &self.topic)
            .field("brokers", &self.brokers)
            .field("balancer", &self.balancer)
            .finish()
    }
}

impl KafkaEventLog {
    /// Create the producer and look up the topic's partitions.
    ///
    /// If metadata is unavailable the record is left to librdkafka's
    /// partitioner.
    pub async fn connect(config: &KafkaConfig) -> Result<Self> {
        let brokers = config.bootstrap_servers.join(",");
        let mut client_config = base_client_config(config);
        client_config
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("message.send.max.retries", "0")
            .set("request.required.acks", "all");

        let producer: FutureProducer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: brokers.clone(),
                message: e.to_string(),
            })
        })?;

        let balancer = match Self::fetch_partitions(&producer, &config.topic).await {
            Ok(partitions) if !partitions.is_empty() => {
                debug!(topic = %config.topic, partitions = partitions.len(), "Least-bytes balancing enabled");
                Some(LeastBytesBalancer::new(partitions))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(topic = %config.topic, error = %e, "Topic metadata unavailable, using default partitioner");
                None
            }
        };

        info!(topic = %config.topic, brokers = %brokers, "Kafka event log ready");

        Ok(Self {
            topic: config.topic.clone(),
            brokers,
            producer,
            balancer,
            delivery_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    async fn fetch_partitions(producer: &FutureProducer, topic: &str) -> Result<Vec<i32>> {
        let producer = producer.clone();
        let topic = topic.to_string();
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic), Duration::from_secs(5))
        })
        .await
        .map_err(|e| Error::Kafka(KafkaError::Metadata(e.to_string())))?
        .map_err(|e| Error::Kafka(KafkaError::Metadata(e.to_string())))?;

        Ok(metadata
            .topics()
            .first()
            .map(|t| t.partitions().iter().map(|p| p.id()).collect())
            .unwrap_or_default())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventLog for KafkaEventLog {
    async fn append(&self, key: &[u8], value: &[u8]) -> Result<LogAck> {
        let mut record = FutureRecord::to(&self.topic).key(key).payload(value);
        if let Some(partition) = self
            .balancer
            .as_ref()
            .and_then(|b| b.pick(key.len() + value.len()))
        {
            record = record.partition(partition);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(e, _owned_message)| {
                Error::Kafka(KafkaError::Produce {
                    topic: self.topic.clone(),
                    message: e.to_string(),
                })
            })?;

        debug!(topic = %self.topic, partition, offset, size = value.len(), "Appended event");
        Ok(LogAck { partition, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_bytes_spreads_equal_records() {
        let balancer = LeastBytesBalancer::new(vec![0, 1, 2]);
        let picks: Vec<_> = (0..6).map(|_| balancer.pick(10).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_least_bytes_prefers_lightest_partition() {
        let balancer = LeastBytesBalancer::new(vec![2, 0, 1]);
        assert_eq!(balancer.pick(100), Some(0));
        assert_eq!(balancer.pick(10), Some(1));
        assert_eq!(balancer.pick(10), Some(2));
        // 1 and 2 hold 10 bytes each, 0 holds 100
        assert_eq!(balancer.pick(5), Some(1));
        assert_eq!(balancer.pick(5), Some(2));
        assert_eq!(
            balancer.snapshot(),
            vec![(0, 100), (1, 15), (2, 15)]
        );
    }

    #[test]
    fn test_least_bytes_without_partitions() {
        let balancer = LeastBytesBalancer::new(vec![]);
        assert_eq!(balancer.pick(10), None);
    }
}
