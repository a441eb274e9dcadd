//! Kafka event log: producer for the ingress side, consumer for analytics.

mod consumer;
mod producer;

pub use consumer::{KafkaRecordSource, KafkaRecordSourceBuilder, RecordSource};
pub use producer::{EventLog, KafkaEventLog, LeastBytesBalancer, LogAck};

use crate::config::KafkaConfig;
use rdkafka::ClientConfig;

/// Client settings shared by producer and consumer.
fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", config.bootstrap_servers.join(","));

    let security = &config.security;
    if let Some(ref protocol) = security.protocol {
        client_config.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = security.sasl_mechanism {
        client_config.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = security.sasl_username {
        client_config.set("sasl.username", username);
    }
    if let Some(ref password) = security.sasl_password {
        client_config.set("sasl.password", password);
    }
    if let Some(ref path) = security.ssl_ca_location {
        client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
    }

    client_config
}
