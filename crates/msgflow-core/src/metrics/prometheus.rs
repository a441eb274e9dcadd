//! Pipeline metrics with Prometheus text export.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Insert latency bucket boundaries in milliseconds.
const INSERT_DURATION_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

/// Counters and gauges for both halves of the pipeline.
///
/// The ingress side records persisted messages and analytics emission; the
/// consumer side records fetches, inserts, retries and drops.
#[derive(Default)]
pub struct PipelineMetrics {
    // ingress
    messages_persisted_total: AtomicU64,
    realtime_publish_failures_total: AtomicU64,
    events_emitted_total: AtomicU64,
    emit_failures_total: AtomicU64,
    events_rejected_total: AtomicU64,
    emitter_queue_depth: AtomicU64,

    // consumer
    records_consumed_total: AtomicU64,
    records_degraded_total: AtomicU64,
    rows_inserted_total: AtomicU64,
    insert_failures_total: AtomicU64,
    records_dropped_total: AtomicU64,
    fetch_errors_total: AtomicU64,
    commit_errors_total: AtomicU64,

    insert_duration_sum_ms: AtomicU64,
    insert_duration_count: AtomicU64,
    // last slot is +Inf
    insert_duration_buckets: [AtomicU64; 11],
}

/// Snapshot of the insert latency histogram.
#[derive(Debug, Clone)]
pub struct InsertDurationHistogram {
    pub sum_seconds: f64,
    pub count: u64,
    /// `(le_seconds, cumulative_count)`
    pub buckets: Vec<(f64, u64)>,
    pub inf_bucket: u64,
}

macro_rules! counter {
    ($record:ident, $get:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_message_persisted, messages_persisted_total, messages_persisted_total);
    counter!(record_publish_failure, realtime_publish_failures_total, realtime_publish_failures_total);
    counter!(record_event_emitted, events_emitted_total, events_emitted_total);
    counter!(record_emit_failure, emit_failures_total, emit_failures_total);
    counter!(record_event_rejected, events_rejected_total, events_rejected_total);
    counter!(record_consumed, records_consumed_total, records_consumed_total);
    counter!(record_degraded, records_degraded_total, records_degraded_total);
    counter!(record_insert_failure, insert_failures_total, insert_failures_total);
    counter!(record_dropped, records_dropped_total, records_dropped_total);
    counter!(record_fetch_error, fetch_errors_total, fetch_errors_total);
    counter!(record_commit_error, commit_errors_total, commit_errors_total);

    /// Record a successful insert and its latency.
    pub fn record_insert(&self, duration: Duration) {
        self.rows_inserted_total.fetch_add(1, Ordering::Relaxed);

        let ms = duration.as_millis() as u64;
        self.insert_duration_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.insert_duration_count.fetch_add(1, Ordering::Relaxed);
        for (i, &bound) in INSERT_DURATION_BUCKETS_MS.iter().enumerate() {
            if ms <= bound {
                self.insert_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.insert_duration_buckets[INSERT_DURATION_BUCKETS_MS.len()]
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_inserted_total(&self) -> u64 {
        self.rows_inserted_total.load(Ordering::Relaxed)
    }

    pub fn set_emitter_queue_depth(&self, depth: usize) {
        self.emitter_queue_depth
            .store(depth as u64, Ordering::Relaxed);
    }

    pub fn emitter_queue_depth(&self) -> u64 {
        self.emitter_queue_depth.load(Ordering::Relaxed)
    }

    pub fn insert_duration_histogram(&self) -> InsertDurationHistogram {
        InsertDurationHistogram {
            sum_seconds: self.insert_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.insert_duration_count.load(Ordering::Relaxed),
            buckets: INSERT_DURATION_BUCKETS_MS
                .iter()
                .enumerate()
                .map(|(i, &ms)| {
                    (
                        ms as f64 / 1000.0,
                        self.insert_duration_buckets[i].load(Ordering::Relaxed),
                    )
                })
                .collect(),
            inf_bucket: self.insert_duration_buckets[INSERT_DURATION_BUCKETS_MS.len()]
                .load(Ordering::Relaxed),
        }
    }

    /// Export in Prometheus text format with the `msgflow` prefix.
    ///
    /// ```
    /// use msgflow_core::metrics::PipelineMetrics;
    ///
    /// let metrics = PipelineMetrics::new();
    /// metrics.record_consumed();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("msgflow_records_consumed_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("msgflow")
    }

    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(4096);

        let counters: [(&str, &str, u64); 12] = [
            (
                "messages_persisted_total",
                "Messages stored in the relational store",
                self.messages_persisted_total(),
            ),
            (
                "realtime_publish_failures_total",
                "Realtime notifications that failed or timed out",
                self.realtime_publish_failures_total(),
            ),
            (
                "events_emitted_total",
                "Analytics events appended to the event log",
                self.events_emitted_total(),
            ),
            (
                "emit_failures_total",
                "Analytics events the event log refused",
                self.emit_failures_total(),
            ),
            (
                "events_rejected_total",
                "Analytics events dropped because the emitter queue was full",
                self.events_rejected_total(),
            ),
            (
                "records_consumed_total",
                "Records fetched from the event log",
                self.records_consumed_total(),
            ),
            (
                "records_degraded_total",
                "Records whose payload could not be decoded",
                self.records_degraded_total(),
            ),
            (
                "rows_inserted_total",
                "Rows inserted into the columnar store",
                self.rows_inserted_total(),
            ),
            (
                "insert_failures_total",
                "Failed insert attempts",
                self.insert_failures_total(),
            ),
            (
                "records_dropped_total",
                "Records dropped after exhausting insert attempts",
                self.records_dropped_total(),
            ),
            (
                "fetch_errors_total",
                "Transient fetch errors",
                self.fetch_errors_total(),
            ),
            (
                "commit_errors_total",
                "Offset commit failures",
                self.commit_errors_total(),
            ),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {prefix}_{name} {help}");
            let _ = writeln!(out, "# TYPE {prefix}_{name} counter");
            let _ = writeln!(out, "{prefix}_{name} {value}");
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "# HELP {prefix}_emitter_queue_depth Analytics events waiting for an emitter worker"
        );
        let _ = writeln!(out, "# TYPE {prefix}_emitter_queue_depth gauge");
        let _ = writeln!(
            out,
            "{prefix}_emitter_queue_depth {}",
            self.emitter_queue_depth()
        );
        out.push('\n');

        let hist = self.insert_duration_histogram();
        let _ = writeln!(
            out,
            "# HELP {prefix}_insert_duration_seconds Latency of successful columnar inserts"
        );
        let _ = writeln!(out, "# TYPE {prefix}_insert_duration_seconds histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                out,
                "{prefix}_insert_duration_seconds_bucket{{le=\"{le}\"}} {count}"
            );
        }
        let _ = writeln!(
            out,
            "{prefix}_insert_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(
            out,
            "{prefix}_insert_duration_seconds_sum {}",
            hist.sum_seconds
        );
        let _ = writeln!(out, "{prefix}_insert_duration_seconds_count {}", hist.count);

        out
    }
}
