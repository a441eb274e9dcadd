//! History command: print a topic's messages.

use anyhow::Result;
use msgflow_core::relational::{MessageStore, PgMessageStore};
use msgflow_core::Config;

pub async fn run(config: Config, topic: &str) -> Result<()> {
    let store = PgMessageStore::connect(&config.postgres).await?;
    let messages = store.history(topic).await?;

    if messages.is_empty() {
        println!("No messages on topic '{}'", topic);
        return Ok(());
    }

    for message in &messages {
        println!(
            "[{}] #{} {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.id,
            message.notification()
        );
    }
    Ok(())
}
