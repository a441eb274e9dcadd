//! Realtime notifications over MQTT.

use crate::config::MqttConfig;
use crate::error::RealtimeError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Publisher for realtime delivery to subscribed clients.
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    /// Publish `payload` on `topic` at QoS 1, not retained.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), RealtimeError>;
}

/// Split a broker URL into host and port.
///
/// Accepts `tcp://`, `mqtt://` or a bare `host:port`; the port defaults to 1883.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), RealtimeError> {
    let (scheme, rest) = match url.find("://") {
        Some(pos) => (&url[..pos], &url[pos + 3..]),
        None => ("tcp", url),
    };

    match scheme.to_ascii_lowercase().as_str() {
        "tcp" | "mqtt" => {}
        other => {
            return Err(RealtimeError::InvalidBroker(format!(
                "unsupported scheme '{other}' in {url}"
            )))
        }
    }

    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rfind(':') {
        Some(pos) => {
            let port = rest[pos + 1..]
                .parse::<u16>()
                .map_err(|_| RealtimeError::InvalidBroker(format!("invalid port in {url}")))?;
            (&rest[..pos], port)
        }
        None => (rest, 1883),
    };

    if host.is_empty() {
        return Err(RealtimeError::InvalidBroker(format!("missing host in {url}")));
    }
    Ok((host.to_string(), port))
}

/// MQTT-backed [`RealtimePublisher`].
///
/// A background task drives the rumqttc event loop, which also reconnects
/// after connection loss. `publish` completes once the request is queued for
/// the event loop.
pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
    publish_timeout: Duration,
}

impl MqttPublisher {
    pub fn connect(config: &MqttConfig) -> Result<Self, RealtimeError> {
        let (host, port) = parse_broker_url(&config.broker_url)?;
        let mut options = MqttOptions::new(&config.client_id, &host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, config.channel_capacity);

        let event_loop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(host = %host, port, "Connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = ack.pkid, "Publish acknowledged");
                    }
                    Ok(_) => {}
                    Err(rumqttc::ConnectionError::RequestsDone) => break,
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            event_loop,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        })
    }

    /// Disconnect and stop the event loop.
    pub async fn shutdown(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect failed");
        }
        self.event_loop.abort();
    }
}

#[async_trait]
impl RealtimePublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), RealtimeError> {
        let publish = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec());

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RealtimeError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(RealtimeError::Timeout {
                topic: topic.to_string(),
            }),
        }
    }
}
