//! Authoritative message store backed by PostgreSQL.

use crate::config::PostgresConfig;
use crate::error::RelationalError;
use crate::model::{Message, NewMessage};
use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id SERIAL PRIMARY KEY,
    topic TEXT NOT NULL,
    sender TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const INSERT_MESSAGE: &str = r#"
INSERT INTO messages (topic, sender, content)
VALUES ($1, $2, $3)
RETURNING id::BIGINT AS id, topic, sender, content, created_at
"#;

const SELECT_HISTORY: &str = r#"
SELECT id::BIGINT AS id, topic, sender, content, created_at
FROM messages
WHERE topic = $1
ORDER BY created_at ASC, id ASC
"#;

/// Read/write contract of the relational store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message; the store assigns `id` and `created_at`.
    async fn insert(&self, msg: &NewMessage) -> Result<Message>;

    /// Messages for `topic`, oldest first.
    async fn history(&self, topic: &str) -> Result<Vec<Message>>;
}

/// PostgreSQL-backed [`MessageStore`].
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    /// Open a connection pool.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.database);
        if let Some(ref password) = config.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| RelationalError::Connection(e.to_string()))?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `messages` table if missing.
    pub async fn bootstrap(&self) -> Result<()> {
        sqlx::query(CREATE_MESSAGES_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, msg: &NewMessage) -> Result<Message> {
        let row = sqlx::query_as::<_, Message>(INSERT_MESSAGE)
            .bind(&msg.topic)
            .bind(&msg.sender)
            .bind(&msg.content)
            .fetch_one(&self.pool)
            .await?;

        if row.id <= 0 {
            return Err(RelationalError::InvalidRow(format!("non-positive id {}", row.id)).into());
        }
        Ok(row)
    }

    async fn history(&self, topic: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(SELECT_HISTORY)
            .bind(topic)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
