//! msgflow core - chat message ingress and analytics pipeline
//!
//! Two halves share this library:
//!
//! - The ingress writer persists a message to PostgreSQL, publishes a
//!   realtime notification over MQTT and queues an analytics event for Kafka.
//! - The analytics consumer drains that Kafka topic into ClickHouse with
//!   schema bootstrap, bounded insert retry and degraded decoding.
//!
//! Delivery is at-least-once end to end.

pub mod columnar;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod ingress;
pub mod kafka;
pub mod metrics;
pub mod model;
pub mod realtime;
pub mod relational;
pub mod retry;

// Re-export commonly used types
pub use config::Config;
pub use error::{ColumnarError, IngressError, KafkaError, RealtimeError, RelationalError};
pub use error::{Error, Result};
