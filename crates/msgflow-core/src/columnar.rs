//! ClickHouse sink for analytics rows.
//!
//! Uses the HTTP interface with `RowBinary` inserts. Schema bootstrap is
//! idempotent and always uses fully qualified `database.table` names.

use crate::config::{ClickHouseCompression, ClickHouseConfig};
use crate::error::ColumnarError;
use crate::model::EventRow;
use async_trait::async_trait;
use clickhouse::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Destination for decoded analytics rows.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Single connectivity check.
    async fn ping(&self) -> Result<(), ColumnarError>;

    /// Create the database and events table if missing.
    async fn bootstrap(&self) -> Result<(), ColumnarError>;

    /// Insert one row. A single attempt; the caller owns retries.
    async fn insert(&self, row: &EventRow) -> Result<(), ColumnarError>;
}

/// `CREATE DATABASE` statement for the events database.
pub fn create_database_ddl(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {database}")
}

/// `CREATE TABLE` statement for the events table.
pub fn create_table_ddl(database: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table} (\n\
         \x20   inserted_at DateTime DEFAULT now(),\n\
         \x20   event_time DateTime,\n\
         \x20   topic String,\n\
         \x20   sender String,\n\
         \x20   content String,\n\
         \x20   raw String\n\
         ) ENGINE = MergeTree\n\
         ORDER BY (event_time, topic, sender)"
    )
}

/// Map a client error onto the retry taxonomy.
///
/// Network failures and client timeouts mean the store never answered;
/// anything else means it answered and refused.
pub fn classify_error(err: &clickhouse::error::Error) -> ColumnarError {
    use clickhouse::error::Error;

    match err {
        Error::Network(_) | Error::TimedOut => ColumnarError::Unreachable(err.to_string()),
        _ => ColumnarError::Server(err.to_string()),
    }
}

/// ClickHouse-backed [`EventSink`].
pub struct ClickHouseStore {
    client: Client,
    database: String,
    table: String,
    dial_timeout: Duration,
}

impl std::fmt::Debug for ClickHouseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseStore")
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

impl ClickHouseStore {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_user(&config.username)
            .with_option(
                "max_execution_time",
                config.max_execution_time_secs.to_string(),
            );

        if let Some(ref password) = config.password {
            client = client.with_password(password);
        }

        client = match config.compression {
            ClickHouseCompression::Lz4 => client.with_compression(clickhouse::Compression::Lz4),
            ClickHouseCompression::None => client.with_compression(clickhouse::Compression::None),
        };

        Self {
            client,
            database: config.database.clone(),
            table: config.table.clone(),
            dial_timeout: config.dial_timeout(),
        }
    }

    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

#[async_trait]
impl EventSink for ClickHouseStore {
    async fn ping(&self) -> Result<(), ColumnarError> {
        match tokio::time::timeout(
            self.dial_timeout,
            self.client.query("SELECT 1").fetch_one::<u8>(),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(classify_error(&e)),
            Err(_) => Err(ColumnarError::Unreachable(format!(
                "no answer within {:?}",
                self.dial_timeout
            ))),
        }
    }

    async fn bootstrap(&self) -> Result<(), ColumnarError> {
        for ddl in [
            create_database_ddl(&self.database),
            create_table_ddl(&self.database, &self.table),
        ] {
            debug!(ddl = %ddl, "Running bootstrap DDL");
            self.client
                .query(&ddl)
                .execute()
                .await
                .map_err(|e| ColumnarError::Bootstrap(e.to_string()))?;
        }

        info!(table = %self.qualified_table(), "Events table ready");
        Ok(())
    }

    async fn insert(&self, row: &EventRow) -> Result<(), ColumnarError> {
        let table = self.qualified_table();
        let mut insert = self
            .client
            .insert::<EventRow>(&table)
            .await
            .map_err(|e| ColumnarError::Insert(e.to_string()))?;
        insert
            .write(row)
            .await
            .map_err(|e| ColumnarError::Insert(e.to_string()))?;
        insert
            .end()
            .await
            .map_err(|e| ColumnarError::Insert(e.to_string()))
    }
}
