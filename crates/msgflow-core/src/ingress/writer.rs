//! Ingress writer: persist, notify, then hand off for analytics.

use super::emitter::{AnalyticsEmitter, DrainReport};
use crate::config::IngressConfig;
use crate::kafka::EventLog;
use crate::metrics::PipelineMetrics;
use crate::model::{IngestEvent, Message, NewMessage};
use crate::realtime::RealtimePublisher;
use crate::relational::MessageStore;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Accepts messages and fans them out.
///
/// Only the relational write can fail a call to [`IngressWriter::write`]. The
/// realtime publish and the analytics hand-off are best effort.
pub struct IngressWriter {
    store: Arc<dyn MessageStore>,
    publisher: Arc<dyn RealtimePublisher>,
    emitter: AnalyticsEmitter,
    metrics: Arc<PipelineMetrics>,
    drain_timeout: Duration,
}

impl IngressWriter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn RealtimePublisher>,
        log: Arc<dyn EventLog>,
        config: &IngressConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            emitter: AnalyticsEmitter::new(log, config, metrics.clone()),
            metrics,
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        }
    }

    #[instrument(skip_all, fields(topic = %msg.topic, sender = %msg.sender))]
    pub async fn write(&self, msg: NewMessage) -> Result<Message> {
        let stored = self.store.insert(&msg).await?;
        self.metrics.record_message_persisted();
        debug!(id = stored.id, "Message persisted");

        if let Err(e) = self
            .publisher
            .publish(&stored.topic, stored.notification().as_bytes())
            .await
        {
            self.metrics.record_publish_failure();
            warn!(id = stored.id, error = %e, "Realtime publish failed");
        }

        match IngestEvent::from(&stored).to_json() {
            Ok(value) => {
                if let Err(e) = self
                    .emitter
                    .emit(stored.sender.clone().into_bytes(), value)
                    .await
                {
                    warn!(id = stored.id, error = %e, "Analytics event not queued");
                }
            }
            Err(e) => warn!(id = stored.id, error = %e, "Analytics event not serialized"),
        }

        Ok(stored)
    }

    /// Messages for `topic`, oldest first.
    pub async fn history(&self, topic: &str) -> Result<Vec<Message>> {
        self.store.history(topic).await
    }

    /// Events waiting for an emitter worker.
    pub fn queued_events(&self) -> usize {
        self.emitter.queued()
    }

    /// Stop accepting analytics events and drain the queue.
    pub async fn shutdown(&self) -> DrainReport {
        self.emitter.shutdown(self.drain_timeout).await
    }
}
