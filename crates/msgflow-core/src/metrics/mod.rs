//! Metrics collection and export.

mod prometheus;

pub use prometheus::{InsertDurationHistogram, PipelineMetrics};
