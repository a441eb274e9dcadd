//! Analytics consumer: drains the event log into the columnar store.
//!
//! One record at a time: fetch, decode, insert with bounded retry, commit.
//! Shutdown is observed between records, so an in-flight insert always
//! finishes or times out before the loop exits.

use crate::columnar::{ClickHouseStore, EventSink};
use crate::config::Config;
use crate::error::ColumnarError;
use crate::health::{components, HealthCheck};
use crate::kafka::{KafkaRecordSourceBuilder, RecordSource};
use crate::metrics::PipelineMetrics;
use crate::model::{decode_event, EventRow, LogRecord};
use crate::retry::{RetryPolicy, StartupProbe};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Lifecycle of an [`AnalyticsConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Probing the store and bootstrapping the schema
    Init,
    /// Fetching and inserting records
    Running,
    /// Shutdown observed, finishing up
    Draining,
    Stopped,
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted { attempts: u32 },
    Dropped { reason: String },
}

pub struct AnalyticsConsumer {
    source: Box<dyn RecordSource>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    probe: StartupProbe,
    poll_wait: Duration,
    fetch_error_pause: Duration,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthCheck>,
    state: watch::Sender<ConsumerState>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl AnalyticsConsumer {
    pub fn new(
        source: Box<dyn RecordSource>,
        sink: Arc<dyn EventSink>,
        config: &Config,
        metrics: Arc<PipelineMetrics>,
        health: Arc<HealthCheck>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Init);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        health.register_component(components::KAFKA);
        health.register_component(components::CLICKHOUSE);

        Self {
            source,
            sink,
            retry: RetryPolicy::from_config(&config.consumer),
            probe: StartupProbe::from_config(&config.clickhouse),
            poll_wait: config.kafka.poll_wait(),
            fetch_error_pause: config.kafka.fetch_error_pause(),
            metrics,
            health,
            state,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Build a consumer wired to Kafka and ClickHouse.
    pub fn connect(
        config: &Config,
        metrics: Arc<PipelineMetrics>,
        health: Arc<HealthCheck>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            broker = %config.kafka.bootstrap_servers.join(","),
            topic = %config.kafka.topic,
            group = %config.kafka.consumer_group,
            store = %config.clickhouse.url,
            database = %config.clickhouse.database,
            table = %config.clickhouse.table,
            "Starting analytics consumer"
        );

        let sink = Arc::new(ClickHouseStore::new(&config.clickhouse));
        let source = KafkaRecordSourceBuilder::new(config.kafka.clone()).build()?;

        Ok(Self::new(Box::new(source), sink, config, metrics, health))
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch state transitions from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Sender that stops [`AnalyticsConsumer::run`] before its next fetch.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    fn set_state(&self, state: ConsumerState) {
        debug!(?state, "Consumer state");
        self.state.send_replace(state);
    }

    /// Wait for the store, bootstrap the schema and confirm the broker.
    ///
    /// Every failure here is fatal.
    pub async fn start(&mut self) -> Result<()> {
        self.set_state(ConsumerState::Init);

        let sink = self.sink.clone();
        if let Err(e) = self.probe.wait_until_ready(|| {
            let sink = sink.clone();
            async move { sink.ping().await }
        })
        .await
        {
            self.health
                .mark_unhealthy(components::CLICKHOUSE, &e.to_string());
            return Err(e);
        }

        if let Err(e) = self.sink.bootstrap().await {
            self.health
                .mark_unhealthy(components::CLICKHOUSE, &e.to_string());
            return Err(Error::Columnar(e));
        }
        self.health.mark_healthy(components::CLICKHOUSE);

        if let Err(e) = self.source.probe().await {
            self.health.mark_unhealthy(components::KAFKA, &e.to_string());
            return Err(e);
        }
        self.health.mark_healthy(components::KAFKA);

        info!(topic = %self.source.subscription(), "Analytics consumer initialised");
        Ok(())
    }

    fn shutdown_requested(&mut self) -> bool {
        use broadcast::error::TryRecvError;
        !matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Consume until shutdown is signalled.
    pub async fn run(&mut self) -> Result<()> {
        self.set_state(ConsumerState::Running);
        self.health.set_ready(true);
        info!("Analytics consumer running");

        loop {
            if self.shutdown_requested() {
                info!("Shutdown signal received");
                break;
            }

            match self.source.fetch(self.poll_wait).await {
                Ok(None) => continue,
                Ok(Some(record)) => {
                    self.metrics.record_consumed();
                    self.health.mark_healthy(components::KAFKA);
                    self.process_record(&record).await;

                    if let Err(e) = self.source.commit(&record).await {
                        self.metrics.record_commit_error();
                        warn!(
                            partition = record.partition,
                            offset = record.offset,
                            error = %e,
                            "Offset commit failed, record will be redelivered"
                        );
                    }
                }
                Err(e) => {
                    self.metrics.record_fetch_error();
                    self.health
                        .mark_degraded(components::KAFKA, &e.to_string());
                    warn!(error = %e, pause = ?self.fetch_error_pause, "Fetch failed");
                    tokio::time::sleep(self.fetch_error_pause).await;
                }
            }
        }

        self.set_state(ConsumerState::Draining);
        self.health.set_ready(false);
        self.set_state(ConsumerState::Stopped);
        info!(
            consumed = self.metrics.records_consumed_total(),
            inserted = self.metrics.rows_inserted_total(),
            dropped = self.metrics.records_dropped_total(),
            "Analytics consumer stopped"
        );
        Ok(())
    }

    /// Decode and insert one record. Never fails; drops are logged and counted.
    pub async fn process_record(&self, record: &LogRecord) -> RecordOutcome {
        let decoded = decode_event(record, self.source.subscription());
        if decoded.degraded {
            self.metrics.record_degraded();
            warn!(
                partition = record.partition,
                offset = record.offset,
                "Undecodable payload, inserting with fallback fields"
            );
        }

        let started = Instant::now();
        match self.insert_with_retry(&decoded.row).await {
            Ok(attempts) => {
                self.metrics.record_insert(started.elapsed());
                self.health.mark_healthy(components::CLICKHOUSE);
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    attempts,
                    "Row inserted"
                );
                RecordOutcome::Inserted { attempts }
            }
            Err(e) => {
                self.metrics.record_dropped();
                self.health
                    .mark_degraded(components::CLICKHOUSE, "records dropped");
                error!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Dropping record after failed inserts"
                );
                RecordOutcome::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Insert under the policy deadline, sleeping `attempt * step` after each
    /// failed attempt. Returns the number of attempts used.
    async fn insert_with_retry(&self, row: &EventRow) -> std::result::Result<u32, ColumnarError> {
        let attempts = async {
            let mut last = None;
            for attempt in 1..=self.retry.max_attempts {
                match self.sink.insert(row).await {
                    Ok(()) => return Ok(attempt),
                    Err(e) => {
                        self.metrics.record_insert_failure();
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            backoff_ms = delay.as_millis() as u64,
                            error = %e,
                            "Insert failed"
                        );
                        last = Some(e);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            Err(last.unwrap_or_else(|| ColumnarError::Insert("no attempts made".into())))
        };

        match tokio::time::timeout(self.retry.deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(ColumnarError::Timeout {
                timeout_ms: self.retry.deadline.as_millis() as u64,
            }),
        }
    }
}
