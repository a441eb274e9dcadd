//! Integration tests for msgflow-core.
//!
//! The pipeline tests wire the ingress writer and analytics consumer to
//! in-memory stores and run everywhere. The container tests require Docker
//! and are marked with #[ignore].
//!
//! Run with: cargo test --test integration_tests -- --ignored

use async_trait::async_trait;
use chrono::Utc;
use msgflow_core::columnar::EventSink;
use msgflow_core::config::{Config, IngressConfig};
use msgflow_core::engine::{AnalyticsConsumer, RecordOutcome};
use msgflow_core::health::HealthCheck;
use msgflow_core::ingress::IngressWriter;
use msgflow_core::kafka::{EventLog, LogAck, RecordSource};
use msgflow_core::metrics::PipelineMetrics;
use msgflow_core::model::{EventRow, LogRecord, Message, NewMessage};
use msgflow_core::realtime::RealtimePublisher;
use msgflow_core::relational::MessageStore;
use msgflow_core::{ColumnarError, Error, RealtimeError, RelationalError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

mod fakes {
    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        pub rows: Mutex<Vec<Message>>,
        pub down: bool,
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn insert(&self, msg: &NewMessage) -> Result<Message> {
            if self.down {
                return Err(RelationalError::Connection("connection refused".into()).into());
            }
            let mut rows = self.rows.lock();
            let stored = Message {
                id: rows.len() as i64 + 1,
                topic: msg.topic.clone(),
                sender: msg.sender.clone(),
                content: msg.content.clone(),
                created_at: Utc::now(),
            };
            rows.push(stored.clone());
            Ok(stored)
        }

        async fn history(&self, topic: &str) -> Result<Vec<Message>> {
            let mut found: Vec<_> = self
                .rows
                .lock()
                .iter()
                .filter(|m| m.topic == topic)
                .cloned()
                .collect();
            found.sort_by_key(|m| (m.created_at, m.id));
            Ok(found)
        }
    }

    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(String, String)>>,
        pub down: bool,
    }

    #[async_trait]
    impl RealtimePublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: &[u8]) -> std::result::Result<(), RealtimeError> {
            if self.down {
                return Err(RealtimeError::Timeout {
                    topic: topic.to_string(),
                });
            }
            self.published
                .lock()
                .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
            Ok(())
        }
    }

    /// Single-partition log kept in memory.
    #[derive(Default)]
    pub struct MemoryLog {
        pub entries: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        pub down: bool,
    }

    impl MemoryLog {
        pub fn records(&self) -> Vec<LogRecord> {
            self.entries
                .lock()
                .iter()
                .enumerate()
                .map(|(offset, (key, value))| LogRecord {
                    key: Some(key.clone()),
                    payload: value.clone(),
                    topic: "message-events".into(),
                    partition: 0,
                    offset: offset as i64,
                    timestamp_ms: Some(1_700_000_000_000),
                })
                .collect()
        }
    }

    #[async_trait]
    impl EventLog for MemoryLog {
        async fn append(&self, key: &[u8], value: &[u8]) -> Result<LogAck> {
            if self.down {
                return Err(Error::Kafka(msgflow_core::KafkaError::Produce {
                    topic: "message-events".into(),
                    message: "all brokers down".into(),
                }));
            }
            let mut entries = self.entries.lock();
            entries.push((key.to_vec(), value.to_vec()));
            Ok(LogAck {
                partition: 0,
                offset: entries.len() as i64 - 1,
            })
        }
    }

    /// Never yields records; the tests drive `process_record` directly.
    pub struct IdleSource;

    #[async_trait]
    impl RecordSource for IdleSource {
        async fn fetch(&mut self, wait: Duration) -> Result<Option<LogRecord>> {
            tokio::time::sleep(wait).await;
            Ok(None)
        }

        async fn commit(&mut self, _record: &LogRecord) -> Result<()> {
            Ok(())
        }

        fn subscription(&self) -> &str {
            "message-events"
        }
    }

    #[derive(Default)]
    pub struct MemorySink {
        pub rows: Mutex<Vec<EventRow>>,
    }

    #[async_trait]
    impl EventSink for MemorySink {
        async fn ping(&self) -> std::result::Result<(), ColumnarError> {
            Ok(())
        }

        async fn bootstrap(&self) -> std::result::Result<(), ColumnarError> {
            Ok(())
        }

        async fn insert(&self, row: &EventRow) -> std::result::Result<(), ColumnarError> {
            self.rows.lock().push(row.clone());
            Ok(())
        }
    }
}

mod pipeline {
    use super::fakes::*;
    use super::*;

    fn writer(
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
        log: Arc<MemoryLog>,
    ) -> (IngressWriter, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let writer = IngressWriter::new(
            store,
            publisher,
            log,
            &IngressConfig::default(),
            metrics.clone(),
        );
        (writer, metrics)
    }

    fn analytics(sink: Arc<MemorySink>) -> AnalyticsConsumer {
        AnalyticsConsumer::new(
            Box::new(IdleSource),
            sink,
            &Config::default(),
            Arc::new(PipelineMetrics::new()),
            Arc::new(HealthCheck::new()),
        )
    }

    #[tokio::test]
    async fn test_example_message_flows_end_to_end() {
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let log = Arc::new(MemoryLog::default());
        let (writer, _) = writer(store.clone(), publisher.clone(), log.clone());

        let msg = writer
            .write(NewMessage::new("general", "ada", "hi"))
            .await
            .unwrap();
        writer.shutdown().await;

        assert_eq!(msg.id, 1);
        assert_eq!(
            *publisher.published.lock(),
            vec![("general".to_string(), "ada: hi".to_string())]
        );

        let expected_json = r#"{"sender":"ada","content":"hi","topic":"general"}"#;
        let entries = log.entries.lock().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, b"ada");
        assert_eq!(entries[0].1, expected_json.as_bytes());

        let sink = Arc::new(MemorySink::default());
        let consumer = analytics(sink.clone());
        for record in log.records() {
            consumer.process_record(&record).await;
        }

        let rows = sink.rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender, "ada");
        assert_eq!(rows[0].content, "hi");
        assert_eq!(rows[0].topic, "general");
        assert_eq!(rows[0].raw, expected_json.as_bytes());
        assert_eq!(rows[0].event_time, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_write_succeeds_when_fanout_fails() {
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(RecordingPublisher {
            down: true,
            ..Default::default()
        });
        let log = Arc::new(MemoryLog {
            down: true,
            ..Default::default()
        });
        let (writer, metrics) = writer(store.clone(), publisher, log.clone());

        let msg = writer
            .write(NewMessage::new("general", "bob", "still here"))
            .await
            .unwrap();
        writer.shutdown().await;

        assert!(msg.id > 0);
        assert_eq!(store.rows.lock().len(), 1);
        assert!(log.entries.lock().is_empty());
        assert_eq!(metrics.realtime_publish_failures_total(), 1);
        assert_eq!(metrics.emit_failures_total(), 1);
    }

    #[tokio::test]
    async fn test_relational_failure_skips_fanout() {
        let store = Arc::new(MemoryStore {
            down: true,
            ..Default::default()
        });
        let publisher = Arc::new(RecordingPublisher::default());
        let log = Arc::new(MemoryLog::default());
        let (writer, _) = writer(store, publisher.clone(), log.clone());

        let err = writer
            .write(NewMessage::new("general", "ada", "hi"))
            .await
            .unwrap_err();
        writer.shutdown().await;

        assert!(matches!(err, Error::Relational(_)));
        assert!(publisher.published.lock().is_empty());
        assert!(log.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_record_yields_duplicate_rows() {
        let log = Arc::new(MemoryLog::default());
        log.append(b"ada", br#"{"sender":"ada","content":"hi","topic":"general"}"#)
            .await
            .unwrap();
        let record = log.records().remove(0);

        let sink = Arc::new(MemorySink::default());
        let consumer = analytics(sink.clone());
        assert_eq!(
            consumer.process_record(&record).await,
            RecordOutcome::Inserted { attempts: 1 }
        );
        consumer.process_record(&record).await;

        let rows = sink.rows.lock();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }

    #[tokio::test]
    async fn test_history_is_ordered_per_topic() {
        let store = Arc::new(MemoryStore::default());
        let (writer, _) = writer(
            store,
            Arc::new(RecordingPublisher::default()),
            Arc::new(MemoryLog::default()),
        );

        writer.write(NewMessage::new("general", "ada", "one")).await.unwrap();
        writer.write(NewMessage::new("random", "bob", "other")).await.unwrap();
        writer.write(NewMessage::new("general", "bob", "two")).await.unwrap();
        writer.shutdown().await;

        let history = writer.history("general").await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_queued_events_drain_on_shutdown() {
        let log = Arc::new(MemoryLog::default());
        let (writer, metrics) = writer(
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingPublisher::default()),
            log.clone(),
        );

        for i in 0..20 {
            writer
                .write(NewMessage::new("general", "ada", format!("m{i}")))
                .await
                .unwrap();
        }
        let report = writer.shutdown().await;

        assert_eq!(report.lost, 0);
        assert_eq!(log.entries.lock().len(), 20);
        assert_eq!(metrics.events_emitted_total(), 20);
        assert_eq!(writer.queued_events(), 0);
    }
}

mod kafka_integration {
    use msgflow_core::config::{KafkaConfig, OffsetReset};
    use msgflow_core::kafka::{EventLog, KafkaEventLog, KafkaRecordSourceBuilder, RecordSource};
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use rdkafka::client::DefaultClientContext;
    use rdkafka::config::ClientConfig;
    use std::time::Duration;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::kafka::Kafka;

    /// Append through the producer and read back through the consumer group.
    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_append_and_consume() {
        let kafka = Kafka::default()
            .start()
            .await
            .expect("Failed to start Kafka container");
        let bootstrap_servers = format!(
            "127.0.0.1:{}",
            kafka
                .get_host_port_ipv4(9093)
                .await
                .expect("Failed to get Kafka port")
        );

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .create()
            .expect("Failed to create admin client");
        admin
            .create_topics(
                &[NewTopic::new("message-events", 3, TopicReplication::Fixed(1))],
                &AdminOptions::new(),
            )
            .await
            .expect("Failed to create topic");

        let config = KafkaConfig {
            bootstrap_servers: vec![bootstrap_servers],
            auto_offset_reset: OffsetReset::Earliest,
            ..Default::default()
        };

        let log = KafkaEventLog::connect(&config).await.unwrap();
        let mut partitions = Vec::new();
        for i in 0..3 {
            let ack = log
                .append(b"ada", format!(r#"{{"sender":"ada","content":"{i}","topic":"general"}}"#).as_bytes())
                .await
                .unwrap();
            partitions.push(ack.partition);
        }
        partitions.sort_unstable();
        // equal-size records spread over all three partitions
        assert_eq!(partitions, vec![0, 1, 2]);

        let mut source = KafkaRecordSourceBuilder::new(config).build().unwrap();
        source.probe().await.unwrap();

        let mut received = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while received.len() < 3 && tokio::time::Instant::now() < deadline {
            if let Some(record) = source.fetch(Duration::from_secs(1)).await.unwrap() {
                source.commit(&record).await.unwrap();
                received.push(record);
            }
        }

        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|r| r.key.as_deref() == Some(&b"ada"[..])));
        assert!(received.iter().all(|r| r.timestamp_ms.is_some()));
    }
}

mod clickhouse_integration {
    use msgflow_core::columnar::{ClickHouseStore, EventSink};
    use msgflow_core::config::ClickHouseConfig;
    use msgflow_core::model::EventRow;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::clickhouse::ClickHouse;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_bootstrap_is_idempotent_and_insert_lands() {
        let container = ClickHouse::default()
            .start()
            .await
            .expect("Failed to start ClickHouse container");
        let port = container
            .get_host_port_ipv4(8123)
            .await
            .expect("Failed to get ClickHouse port");

        let config = ClickHouseConfig {
            url: format!("http://127.0.0.1:{port}"),
            database: "analytics".into(),
            ..Default::default()
        };
        let store = ClickHouseStore::new(&config);

        store.ping().await.unwrap();
        store.bootstrap().await.unwrap();
        store.bootstrap().await.unwrap();

        let row = EventRow {
            event_time: 1_700_000_000,
            topic: "general".into(),
            sender: "ada".into(),
            content: "hi".into(),
            raw: br#"{"sender":"ada","content":"hi","topic":"general"}"#.to_vec(),
        };
        store.insert(&row).await.unwrap();
        store.insert(&row).await.unwrap();

        let count: u64 = clickhouse::Client::default()
            .with_url(&config.url)
            .query("SELECT count() FROM analytics.message_events WHERE sender = 'ada'")
            .fetch_one()
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}

mod postgres_integration {
    use msgflow_core::config::PostgresConfig;
    use msgflow_core::model::NewMessage;
    use msgflow_core::relational::{MessageStore, PgMessageStore};
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_insert_and_history() {
        let container = Postgres::default()
            .start()
            .await
            .expect("Failed to start Postgres container");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get Postgres port");

        let config = PostgresConfig {
            host: "127.0.0.1".into(),
            port,
            user: "postgres".into(),
            password: Some("postgres".into()),
            database: "postgres".into(),
            ..Default::default()
        };
        let store = PgMessageStore::connect(&config).await.unwrap();
        store.bootstrap().await.unwrap();
        store.bootstrap().await.unwrap();

        let first = store
            .insert(&NewMessage::new("general", "ada", "hi"))
            .await
            .unwrap();
        store
            .insert(&NewMessage::new("general", "bob", "hello"))
            .await
            .unwrap();

        assert_eq!(first.id, 1);
        let history = store.history("general").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, "ada");
        assert!(history[0].created_at <= history[1].created_at);
    }
}
