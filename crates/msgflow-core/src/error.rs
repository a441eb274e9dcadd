//! Error types for msgflow core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Only [`Error::Relational`] is ever surfaced to a caller of the ingress
//! writer; every other fan-out failure is logged where it happens.

use thiserror::Error;

/// Result type alias for msgflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for msgflow.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fatal startup error (store or broker unreachable past the deadline)
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// ClickHouse-related error
    #[error("Columnar store error: {0}")]
    Columnar(#[from] ColumnarError),

    /// PostgreSQL-related error
    #[error("Relational store error: {0}")]
    Relational(#[from] RelationalError),

    /// MQTT-related error
    #[error("Realtime broker error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Analytics emission error
    #[error("Ingress error: {0}")]
    Ingress(#[from] IngressError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Transient error while fetching the next record
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Producer delivery failed
    #[error("Produce to {topic} failed: {message}")]
    Produce { topic: String, message: String },

    /// Topic metadata lookup failed
    #[error("Metadata error: {0}")]
    Metadata(String),
}

/// ClickHouse-specific errors.
#[derive(Error, Debug)]
pub enum ColumnarError {
    /// Store did not answer (network, refused, dial timeout)
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    /// Store answered with an exception
    #[error("Store rejected request: {0}")]
    Server(String),

    /// Schema bootstrap failed
    #[error("Bootstrap DDL failed: {0}")]
    Bootstrap(String),

    /// Row insert failed
    #[error("Insert failed: {0}")]
    Insert(String),

    /// Per-record insert deadline exceeded
    #[error("Insert timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl ColumnarError {
    /// Whether the startup probe should keep trying after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ColumnarError::Unreachable(_))
    }
}

/// PostgreSQL-specific errors.
#[derive(Error, Debug)]
pub enum RelationalError {
    /// Failed to connect
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Query failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Insert returned a row that violates the Message contract
    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

/// MQTT-specific errors.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Invalid broker address
    #[error("Invalid broker URL: {0}")]
    InvalidBroker(String),

    /// Publish was not accepted
    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    /// Publish did not complete in time
    #[error("Publish to {topic} timed out")]
    Timeout { topic: String },
}

/// Analytics emitter errors.
#[derive(Error, Debug)]
pub enum IngressError {
    /// Emission queue at capacity
    #[error("Emission queue full (depth {depth})")]
    QueueFull { depth: usize },

    /// Emitter already shut down
    #[error("Emitter closed")]
    Closed,
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<sqlx::Error> for RelationalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                RelationalError::Connection(err.to_string())
            }
            other => RelationalError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Relational(err.into())
    }
}
