//! Long-running analytics consumer.

mod consumer;

pub use consumer::{AnalyticsConsumer, ConsumerState, RecordOutcome};
