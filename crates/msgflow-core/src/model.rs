//! Data model shared by the ingress writer and the analytics consumer.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as stored in the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub topic: String,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Realtime notification body, `"<sender>: <content>"`.
    pub fn notification(&self) -> String {
        format!("{}: {}", self.sender, self.content)
    }
}

/// A write request accepted by the ingress writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub topic: String,
    pub sender: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(
        topic: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            sender: sender.into(),
            content: content.into(),
        }
    }
}

/// Analytics payload carried on the event log.
///
/// Field order is part of the wire format: `sender`, `content`, `topic`.
/// Missing fields decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestEvent {
    pub sender: String,
    pub content: String,
    pub topic: String,
}

impl IngestEvent {
    /// Compact JSON encoding.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl From<&Message> for IngestEvent {
    fn from(msg: &Message) -> Self {
        Self {
            sender: msg.sender.clone(),
            content: msg.content.clone(),
            topic: msg.topic.clone(),
        }
    }
}

/// A record fetched from the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker or producer timestamp in milliseconds since the epoch
    pub timestamp_ms: Option<i64>,
}

/// One row of the columnar events table.
///
/// `inserted_at` is left to the column default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, clickhouse::Row)]
pub struct EventRow {
    /// Seconds since the epoch (ClickHouse `DateTime`)
    pub event_time: u32,
    pub topic: String,
    pub sender: String,
    pub content: String,
    /// Payload exactly as received (ClickHouse `String` holds arbitrary bytes)
    #[serde(with = "serde_bytes")]
    pub raw: Vec<u8>,
}

/// Result of decoding a log record into a row.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub row: EventRow,
    /// The payload was not valid IngestEvent JSON
    pub degraded: bool,
}

/// Decode a log record into a row, never failing.
///
/// An undecodable payload becomes an empty event. Empty `sender` falls back to
/// the record key and empty `topic` to `subscription_topic`. `raw` always keeps
/// the original bytes.
pub fn decode_event(record: &LogRecord, subscription_topic: &str) -> DecodedEvent {
    decode_event_at(record, subscription_topic, Utc::now())
}

/// [`decode_event`] with an explicit clock for records without a timestamp.
pub fn decode_event_at(
    record: &LogRecord,
    subscription_topic: &str,
    now: DateTime<Utc>,
) -> DecodedEvent {
    let (event, degraded) = match serde_json::from_slice::<IngestEvent>(&record.payload) {
        Ok(event) => (event, false),
        Err(_) => (IngestEvent::default(), true),
    };

    let sender = if event.sender.is_empty() {
        record
            .key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default()
    } else {
        event.sender
    };

    let topic = if event.topic.is_empty() {
        subscription_topic.to_string()
    } else {
        event.topic
    };

    let event_time = record
        .timestamp_ms
        .filter(|ts| *ts > 0)
        .and_then(|ts| Utc.timestamp_millis_opt(ts).single())
        .unwrap_or(now);

    DecodedEvent {
        row: EventRow {
            event_time: event_time.timestamp().clamp(0, u32::MAX as i64) as u32,
            topic,
            sender,
            content: event.content,
            raw: record.payload.clone(),
        },
        degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: Option<&str>, payload: &[u8], timestamp_ms: Option<i64>) -> LogRecord {
        LogRecord {
            key: key.map(|k| k.as_bytes().to_vec()),
            payload: payload.to_vec(),
            topic: "message-events".into(),
            partition: 0,
            offset: 7,
            timestamp_ms,
        }
    }

    #[test]
    fn test_ingest_event_field_order() {
        let event = IngestEvent {
            sender: "ada".into(),
            content: "hi".into(),
            topic: "general".into(),
        };
        let json = String::from_utf8(event.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"sender":"ada","content":"hi","topic":"general"}"#);
    }

    #[test]
    fn test_ingest_event_missing_fields() {
        let event: IngestEvent = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        assert_eq!(event.sender, "");
        assert_eq!(event.content, "x");
        assert_eq!(event.topic, "");
    }

    #[test]
    fn test_notification_payload() {
        let msg = Message {
            id: 1,
            topic: "general".into(),
            sender: "ada".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        assert_eq!(msg.notification(), "ada: hi");
        assert_eq!(
            IngestEvent::from(&msg),
            IngestEvent {
                sender: "ada".into(),
                content: "hi".into(),
                topic: "general".into()
            }
        );
    }

    #[test]
    fn test_decode_well_formed() {
        let payload = br#"{"sender":"ada","content":"hi","topic":"general"}"#;
        let decoded = decode_event(&record(Some("ada"), payload, Some(1_700_000_000_500)), "t");

        assert!(!decoded.degraded);
        assert_eq!(decoded.row.sender, "ada");
        assert_eq!(decoded.row.content, "hi");
        assert_eq!(decoded.row.topic, "general");
        assert_eq!(decoded.row.event_time, 1_700_000_000);
        assert_eq!(decoded.row.raw, payload);
    }

    #[test]
    fn test_decode_malformed_falls_back() {
        let now = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let decoded = decode_event_at(&record(Some("bob"), b"not json{", None), "message-events", now);

        assert!(decoded.degraded);
        assert_eq!(decoded.row.sender, "bob");
        assert_eq!(decoded.row.topic, "message-events");
        assert_eq!(decoded.row.content, "");
        assert_eq!(decoded.row.raw, b"not json{");
        assert_eq!(decoded.row.event_time, 1_600_000_000);
    }

    #[test]
    fn test_decode_partial_event_fills_gaps() {
        let now = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let decoded = decode_event_at(
            &record(Some("carol"), br#"{"content":"yo"}"#, Some(0)),
            "fallback",
            now,
        );

        assert!(!decoded.degraded);
        assert_eq!(decoded.row.sender, "carol");
        assert_eq!(decoded.row.topic, "fallback");
        assert_eq!(decoded.row.content, "yo");
        assert_eq!(decoded.row.event_time, 1_600_000_000);
    }

    #[test]
    fn test_decode_keeps_invalid_utf8_bytes() {
        let payload = [0xff, b'{', 0xc3, 0x28];
        let decoded = decode_event(&record(None, &payload, Some(1000)), "t");
        assert!(decoded.degraded);
        assert_eq!(decoded.row.sender, "");
        assert_eq!(decoded.row.raw, payload);
        assert_eq!(decoded.row.event_time, 1);
    }
}
