//! Bounded queue feeding analytics events to the event log.
//!
//! Callers enqueue and return; a fixed pool of workers performs the appends.
//! Append failures are logged and counted, never retried.

use crate::config::{IngressConfig, OverflowPolicy};
use crate::error::IngressError;
use crate::kafka::EventLog;
use crate::metrics::PipelineMetrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Emission {
    key: Vec<u8>,
    value: Vec<u8>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Emission>>>;

/// Outcome of [`AnalyticsEmitter::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Events still queued when the drain deadline passed
    pub lost: usize,
    pub timed_out: bool,
}

pub struct AnalyticsEmitter {
    tx: Mutex<Option<mpsc::Sender<Emission>>>,
    rx: SharedReceiver,
    workers: Mutex<Vec<JoinHandle<()>>>,
    policy: OverflowPolicy,
    depth: usize,
    metrics: Arc<PipelineMetrics>,
}

impl AnalyticsEmitter {
    /// Create the queue and spawn `config.emitter_workers` workers.
    pub fn new(
        log: Arc<dyn EventLog>,
        config: &IngressConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let depth = config.queue_depth.max(1);
        let (tx, rx) = mpsc::channel::<Emission>(depth);
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..config.emitter_workers.max(1))
            .map(|id| tokio::spawn(Self::worker(id, rx.clone(), log.clone(), metrics.clone())))
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            workers: Mutex::new(workers),
            policy: config.overflow_policy,
            depth,
            metrics,
        }
    }

    async fn worker(
        id: usize,
        rx: SharedReceiver,
        log: Arc<dyn EventLog>,
        metrics: Arc<PipelineMetrics>,
    ) {
        loop {
            let next = { rx.lock().await.recv().await };
            let Some(emission) = next else {
                debug!(worker = id, "Emitter worker stopping");
                break;
            };

            match log.append(&emission.key, &emission.value).await {
                Ok(ack) => {
                    metrics.record_event_emitted();
                    debug!(
                        worker = id,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Analytics event appended"
                    );
                }
                Err(e) => {
                    metrics.record_emit_failure();
                    warn!(worker = id, error = %e, "Failed to append analytics event");
                }
            }
        }
    }

    /// Queue an event for appending under `key`.
    ///
    /// With [`OverflowPolicy::Reject`] a full queue drops the event; with
    /// [`OverflowPolicy::Block`] the caller waits for space.
    pub async fn emit(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), IngressError> {
        let tx = self.tx.lock().clone().ok_or(IngressError::Closed)?;
        let emission = Emission { key, value };

        match self.policy {
            OverflowPolicy::Reject => match tx.try_send(emission) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.metrics.record_event_rejected();
                    warn!(depth = self.depth, "Analytics queue full, event dropped");
                    return Err(IngressError::QueueFull { depth: self.depth });
                }
                Err(TrySendError::Closed(_)) => return Err(IngressError::Closed),
            },
            OverflowPolicy::Block => {
                tx.send(emission).await.map_err(|_| IngressError::Closed)?;
            }
        }

        self.metrics
            .set_emitter_queue_depth(self.depth - tx.capacity());
        Ok(())
    }

    /// Events waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| self.depth - tx.capacity())
            .unwrap_or(0)
    }

    /// Close the queue and let the workers drain it, bounded by `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        // dropping the last sender ends each worker once the queue is empty
        drop(self.tx.lock().take());
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        let report = match tokio::time::timeout(timeout, futures::future::join_all(workers)).await
        {
            Ok(_) => DrainReport {
                lost: 0,
                timed_out: false,
            },
            Err(_) => {
                aborts.iter().for_each(|a| a.abort());
                let lost = self.rx.lock().await.len();
                warn!(lost, ?timeout, "Analytics drain timed out, queued events lost");
                DrainReport {
                    lost,
                    timed_out: true,
                }
            }
        };

        self.metrics.set_emitter_queue_depth(report.lost);
        info!(lost = report.lost, "Analytics emitter stopped");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::LogAck;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Records appends; each append waits for a permit.
    struct GatedLog {
        gate: Semaphore,
        appended: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        fail: bool,
    }

    impl GatedLog {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                appended: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn closed() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                appended: Mutex::new(Vec::new()),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl EventLog for GatedLog {
        async fn append(&self, key: &[u8], value: &[u8]) -> crate::Result<LogAck> {
            let permit = self.gate.acquire().await.map_err(|_| crate::Error::Shutdown)?;
            permit.forget();
            if self.fail {
                return Err(crate::Error::Kafka(crate::KafkaError::Produce {
                    topic: "message-events".into(),
                    message: "broker down".into(),
                }));
            }
            let mut appended = self.appended.lock();
            appended.push((key.to_vec(), value.to_vec()));
            Ok(LogAck {
                partition: 0,
                offset: appended.len() as i64 - 1,
            })
        }
    }

    fn config(depth: usize, workers: usize, policy: OverflowPolicy) -> IngressConfig {
        IngressConfig {
            queue_depth: depth,
            emitter_workers: workers,
            overflow_policy: policy,
            drain_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_emit_and_drain() {
        let log = GatedLog::open();
        let metrics = Arc::new(PipelineMetrics::new());
        let emitter = AnalyticsEmitter::new(log.clone(), &config(8, 2, OverflowPolicy::Reject), metrics.clone());

        for i in 0..5 {
            emitter
                .emit(b"ada".to_vec(), format!("{i}").into_bytes())
                .await
                .unwrap();
        }

        let report = emitter.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report, DrainReport { lost: 0, timed_out: false });
        assert_eq!(log.appended.lock().len(), 5);
        assert_eq!(metrics.events_emitted_total(), 5);
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let log = GatedLog::closed();
        let metrics = Arc::new(PipelineMetrics::new());
        let emitter = AnalyticsEmitter::new(log.clone(), &config(2, 1, OverflowPolicy::Reject), metrics.clone());

        // one event is taken by the blocked worker, two fill the queue
        emitter.emit(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        emitter.emit(b"a".to_vec(), b"2".to_vec()).await.unwrap();
        emitter.emit(b"a".to_vec(), b"3".to_vec()).await.unwrap();

        let err = emitter.emit(b"a".to_vec(), b"4".to_vec()).await.unwrap_err();
        assert!(matches!(err, IngressError::QueueFull { depth: 2 }));
        assert_eq!(metrics.events_rejected_total(), 1);
        assert_eq!(emitter.queued(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_waits_for_space() {
        let log = GatedLog::closed();
        let metrics = Arc::new(PipelineMetrics::new());
        let emitter = Arc::new(AnalyticsEmitter::new(
            log.clone(),
            &config(1, 1, OverflowPolicy::Block),
            metrics,
        ));

        emitter.emit(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        emitter.emit(b"a".to_vec(), b"2".to_vec()).await.unwrap();

        let blocked = {
            let emitter = emitter.clone();
            tokio::spawn(async move { emitter.emit(b"a".to_vec(), b"3".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        log.gate.add_permits(3);
        blocked.await.unwrap().unwrap();

        emitter.shutdown(Duration::from_secs(1)).await;
        assert_eq!(log.appended.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_reports_lost_events() {
        let log = GatedLog::closed();
        let metrics = Arc::new(PipelineMetrics::new());
        let emitter = AnalyticsEmitter::new(log, &config(8, 1, OverflowPolicy::Reject), metrics);

        for i in 0..4 {
            emitter.emit(b"a".to_vec(), vec![i]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = emitter.shutdown(Duration::from_secs(2)).await;
        assert!(report.timed_out);
        // the worker holds one event in its stalled append
        assert_eq!(report.lost, 3);
    }

    #[tokio::test]
    async fn test_emit_after_shutdown_is_closed() {
        let metrics = Arc::new(PipelineMetrics::new());
        let emitter = AnalyticsEmitter::new(GatedLog::open(), &config(4, 1, OverflowPolicy::Reject), metrics);
        emitter.shutdown(Duration::from_secs(1)).await;

        let err = emitter.emit(b"a".to_vec(), b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, IngressError::Closed));
    }

    #[tokio::test]
    async fn test_append_failure_is_counted() {
        let log = Arc::new(GatedLog {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            appended: Mutex::new(Vec::new()),
            fail: true,
        });
        let metrics = Arc::new(PipelineMetrics::new());
        let emitter = AnalyticsEmitter::new(log, &config(4, 1, OverflowPolicy::Reject), metrics.clone());

        emitter.emit(b"a".to_vec(), b"x".to_vec()).await.unwrap();
        emitter.shutdown(Duration::from_secs(1)).await;

        assert_eq!(metrics.emit_failures_total(), 1);
        assert_eq!(metrics.events_emitted_total(), 0);
    }
}
