//! Configuration structures for msgflow.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags
//! or environment variables. Every section has defaults matching a local
//! development stack, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration (producer and consumer)
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// ClickHouse configuration
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,

    /// PostgreSQL configuration
    #[serde(default)]
    pub postgres: PostgresConfig,

    /// MQTT configuration
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Ingress writer configuration
    #[serde(default)]
    pub ingress: IngressConfig,

    /// Analytics consumer configuration
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka configuration shared by the event producer and the analytics consumer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: Vec<String>,

    /// Topic carrying analytics events
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Upper bound on a single fetch wait in milliseconds
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    /// Pause after a transient fetch error in milliseconds
    #[serde(default = "default_fetch_error_pause_ms")]
    pub fetch_error_pause_ms: u64,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the longest insert cycle)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Where a new consumer group starts reading
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Producer delivery timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            topic: default_topic(),
            consumer_group: default_consumer_group(),
            poll_wait_ms: default_poll_wait_ms(),
            fetch_error_pause_ms: default_fetch_error_pause_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            auto_offset_reset: OffsetReset::default(),
            message_timeout_ms: default_message_timeout_ms(),
            security: KafkaSecurityConfig::default(),
        }
    }
}

impl KafkaConfig {
    /// Bounded wait for one fetch.
    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    /// Pause applied after a transient fetch error.
    pub fn fetch_error_pause(&self) -> Duration {
        Duration::from_millis(self.fetch_error_pause_ms)
    }
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    Earliest,
    /// Start from latest offset
    #[default]
    Latest,
}

impl OffsetReset {
    /// librdkafka `auto.offset.reset` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,
}

/// ClickHouse configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickHouseConfig {
    /// HTTP endpoint, e.g. `http://localhost:8123`
    #[serde(default = "default_clickhouse_url")]
    pub url: String,

    /// Database holding the events table
    #[serde(default = "default_clickhouse_database")]
    pub database: String,

    /// Events table name
    #[serde(default = "default_clickhouse_table")]
    pub table: String,

    /// Username
    #[serde(default = "default_clickhouse_user")]
    pub username: String,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Wire compression
    #[serde(default)]
    pub compression: ClickHouseCompression,

    /// Bound on a single connectivity probe in milliseconds
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Server-side execution ceiling in seconds
    #[serde(default = "default_max_execution_time_secs")]
    pub max_execution_time_secs: u64,

    /// How long startup keeps probing an unreachable store
    #[serde(default = "default_startup_deadline_secs")]
    pub startup_deadline_secs: u64,

    /// Interval between startup probes in milliseconds
    #[serde(default = "default_startup_interval_ms")]
    pub startup_interval_ms: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_clickhouse_database(),
            table: default_clickhouse_table(),
            username: default_clickhouse_user(),
            password: None,
            compression: ClickHouseCompression::default(),
            dial_timeout_ms: default_dial_timeout_ms(),
            max_execution_time_secs: default_max_execution_time_secs(),
            startup_deadline_secs: default_startup_deadline_secs(),
            startup_interval_ms: default_startup_interval_ms(),
        }
    }
}

impl ClickHouseConfig {
    /// Fully qualified `database.table`.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Bound on a single connectivity probe.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

/// ClickHouse wire compression.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ClickHouseCompression {
    /// No compression
    None,
    /// LZ4 (default)
    #[default]
    Lz4,
}

/// PostgreSQL configuration for the authoritative message store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    /// Host
    #[serde(default = "default_pg_host")]
    pub host: String,

    /// Port
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// User
    #[serde(default = "default_pg_user")]
    pub user: String,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Database name
    #[serde(default = "default_pg_database")]
    pub database: String,

    /// Pool size
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout in seconds
    #[serde(default = "default_pg_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: None,
            database: default_pg_database(),
            max_connections: default_pg_max_connections(),
            acquire_timeout_secs: default_pg_acquire_timeout_secs(),
        }
    }
}

/// MQTT configuration for realtime notifications.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    /// Broker URL (`tcp://host:port`, `mqtt://host:port`)
    #[serde(default = "default_mqtt_broker")]
    pub broker_url: String,

    /// Client identifier
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    /// Keep-alive in seconds
    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Bound on a single publish in milliseconds
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Outgoing request channel capacity
    #[serde(default = "default_mqtt_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: default_mqtt_broker(),
            client_id: default_mqtt_client_id(),
            keep_alive_secs: default_mqtt_keep_alive_secs(),
            publish_timeout_ms: default_publish_timeout_ms(),
            channel_capacity: default_mqtt_channel_capacity(),
        }
    }
}

/// Ingress writer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngressConfig {
    /// Maximum analytics events waiting for an emitter worker
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Number of emitter workers appending to Kafka
    #[serde(default = "default_emitter_workers")]
    pub emitter_workers: usize,

    /// What to do when the queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Bound on draining the queue at shutdown, in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            emitter_workers: default_emitter_workers(),
            overflow_policy: OverflowPolicy::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// Behaviour of the analytics emitter when its queue is full.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the event and log it
    #[default]
    Reject,
    /// Wait for queue space (never for the append itself)
    Block,
}

/// Analytics consumer insert policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Deadline covering every insert attempt of one record, in milliseconds
    #[serde(default = "default_insert_timeout_ms")]
    pub insert_timeout_ms: u64,

    /// Insert attempts per record
    #[serde(default = "default_insert_max_attempts")]
    pub insert_max_attempts: u32,

    /// Linear backoff step in milliseconds (delay = attempt * step)
    #[serde(default = "default_insert_backoff_step_ms")]
    pub insert_backoff_step_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            insert_timeout_ms: default_insert_timeout_ms(),
            insert_max_attempts: default_insert_max_attempts(),
            insert_backoff_step_ms: default_insert_backoff_step_ms(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Prometheus metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}
fn default_topic() -> String {
    "message-events".to_string()
}
fn default_consumer_group() -> String {
    "metrics-service".to_string()
}
fn default_poll_wait_ms() -> u64 {
    1000
}
fn default_fetch_error_pause_ms() -> u64 {
    750
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000
}
fn default_message_timeout_ms() -> u64 {
    5000
}
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}
fn default_clickhouse_database() -> String {
    "default".to_string()
}
fn default_clickhouse_table() -> String {
    "message_events".to_string()
}
fn default_clickhouse_user() -> String {
    "default".to_string()
}
fn default_dial_timeout_ms() -> u64 {
    5000
}
fn default_max_execution_time_secs() -> u64 {
    60
}
fn default_startup_deadline_secs() -> u64 {
    60
}
fn default_startup_interval_ms() -> u64 {
    1000
}
fn default_pg_host() -> String {
    "localhost".to_string()
}
fn default_pg_port() -> u16 {
    5433
}
fn default_pg_user() -> String {
    "msgflow".to_string()
}
fn default_pg_database() -> String {
    "msgflow".to_string()
}
fn default_pg_max_connections() -> u32 {
    5
}
fn default_pg_acquire_timeout_secs() -> u64 {
    5
}
fn default_mqtt_broker() -> String {
    "tcp://localhost:1883".to_string()
}
fn default_mqtt_client_id() -> String {
    "msgflow-ingress".to_string()
}
fn default_mqtt_keep_alive_secs() -> u64 {
    30
}
fn default_publish_timeout_ms() -> u64 {
    5000
}
fn default_mqtt_channel_capacity() -> usize {
    64
}
fn default_queue_depth() -> usize {
    1024
}
fn default_emitter_workers() -> usize {
    2
}
fn default_drain_timeout_secs() -> u64 {
    10
}
fn default_insert_timeout_ms() -> u64 {
    5000
}
fn default_insert_max_attempts() -> u32 {
    3
}
fn default_insert_backoff_step_ms() -> u64 {
    400
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

/// Whether `name` is safe to splice into DDL as a ClickHouse identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 255 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.clickhouse.url.is_empty() {
            return Err(crate::Error::Config("ClickHouse url is required".into()));
        }

        if !is_valid_identifier(&self.clickhouse.database) {
            return Err(crate::Error::Config(format!(
                "Invalid ClickHouse database name '{}'",
                self.clickhouse.database
            )));
        }

        if !is_valid_identifier(&self.clickhouse.table) {
            return Err(crate::Error::Config(format!(
                "Invalid ClickHouse table name '{}'",
                self.clickhouse.table
            )));
        }

        if self.consumer.insert_max_attempts == 0 {
            return Err(crate::Error::Config(
                "insert_max_attempts must be at least 1".into(),
            ));
        }

        if self.ingress.queue_depth == 0 || self.ingress.emitter_workers == 0 {
            return Err(crate::Error::Config(
                "Ingress queue_depth and emitter_workers must be at least 1".into(),
            ));
        }

        if self.consumer.insert_timeout_ms < self.consumer.insert_backoff_step_ms {
            tracing::warn!(
                insert_timeout_ms = self.consumer.insert_timeout_ms,
                backoff_step_ms = self.consumer.insert_backoff_step_ms,
                "Insert deadline shorter than one backoff step; retries will rarely run"
            );
        }

        Ok(())
    }
}
