//! msgflow CLI - chat message ingress and Kafka to ClickHouse analytics.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use msgflow_core::config::LogFormat;
use msgflow_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, bad override)
    ConfigError = 1,
    /// Kafka-related error (connection, consumer, producer)
    KafkaError = 2,
    /// ClickHouse error (bootstrap, insert)
    ColumnarError = 3,
    /// PostgreSQL error
    RelationalError = 4,
    /// MQTT error
    RealtimeError = 5,
    /// Dependency not reachable during startup
    StartupError = 6,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    #[allow(dead_code)]
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code by its error family.
    fn from_error(error: &anyhow::Error) -> Self {
        use msgflow_core::Error;

        match error.downcast_ref::<Error>() {
            Some(Error::Config(_)) => ExitCode::ConfigError,
            Some(Error::Kafka(_)) => ExitCode::KafkaError,
            Some(Error::Columnar(_)) => ExitCode::ColumnarError,
            Some(Error::Relational(_)) => ExitCode::RelationalError,
            Some(Error::Realtime(_)) => ExitCode::RealtimeError,
            Some(Error::Startup(_)) => ExitCode::StartupError,
            Some(_) => ExitCode::RuntimeError,
            None if error.downcast_ref::<toml::de::Error>().is_some() => ExitCode::ConfigError,
            None => ExitCode::RuntimeError,
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "msgflow")]
#[command(about = "Chat message ingress and Kafka to ClickHouse analytics", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ./msgflow.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    overrides: Overrides,
}

/// Settings that take precedence over the configuration file.
#[derive(Args, Debug, Default, Clone)]
struct Overrides {
    /// Kafka bootstrap servers, comma separated
    #[arg(long, env = "KAFKA_BROKER", global = true)]
    kafka_broker: Option<String>,

    /// Analytics event topic
    #[arg(long, env = "KAFKA_TOPIC", global = true)]
    kafka_topic: Option<String>,

    /// Consumer group id
    #[arg(long, env = "KAFKA_GROUP_ID", global = true)]
    kafka_group_id: Option<String>,

    /// ClickHouse address (host:port or URL)
    #[arg(long, env = "CLICKHOUSE_ADDR", global = true)]
    clickhouse_addr: Option<String>,

    #[arg(long, env = "CLICKHOUSE_DB", global = true)]
    clickhouse_db: Option<String>,

    #[arg(long, env = "CLICKHOUSE_TABLE", global = true)]
    clickhouse_table: Option<String>,

    #[arg(long, env = "CLICKHOUSE_USER", global = true)]
    clickhouse_user: Option<String>,

    #[arg(long, env = "CLICKHOUSE_PASSWORD", global = true, hide_env_values = true)]
    clickhouse_password: Option<String>,

    /// PostgreSQL host
    #[arg(long, env = "DB_HOST", global = true)]
    db_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, env = "DB_PORT", global = true)]
    db_port: Option<u16>,

    /// MQTT broker URL
    #[arg(long, env = "MQTT_BROKER", global = true)]
    mqtt_broker: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(servers) = self.kafka_broker {
            config.kafka.bootstrap_servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(topic) = self.kafka_topic {
            config.kafka.topic = topic;
        }
        if let Some(group) = self.kafka_group_id {
            config.kafka.consumer_group = group;
        }
        if let Some(addr) = self.clickhouse_addr {
            config.clickhouse.url = clickhouse_url(&addr);
        }
        if let Some(db) = self.clickhouse_db {
            config.clickhouse.database = db;
        }
        if let Some(table) = self.clickhouse_table {
            config.clickhouse.table = table;
        }
        if let Some(user) = self.clickhouse_user {
            config.clickhouse.username = user;
        }
        if let Some(password) = self.clickhouse_password {
            config.clickhouse.password = Some(password).filter(|p| !p.is_empty());
        }
        if let Some(host) = self.db_host {
            config.postgres.host = host;
        }
        if let Some(port) = self.db_port {
            config.postgres.port = port;
        }
        if let Some(broker) = self.mqtt_broker {
            config.mqtt.broker_url = broker;
        }
    }
}

/// `localhost:8123` becomes `http://localhost:8123`.
fn clickhouse_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analytics consumer (Kafka to ClickHouse)
    Consume,

    /// Write one message through the ingress writer
    Send {
        /// Chat topic
        #[arg(long)]
        topic: String,

        /// Sender name
        #[arg(long)]
        sender: String,

        /// Message body
        content: String,
    },

    /// Print a topic's message history, oldest first
    History {
        /// Chat topic
        topic: String,
    },

    /// Show status and health of a running consumer
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log format comes from the config file when it parses, JSON otherwise
    let log_format = config_path(&cli.config)
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Json);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config, cli.overrides)?;

    match cli.command {
        Commands::Consume => {
            commands::consume::run(config).await?;
        }

        Commands::Send {
            topic,
            sender,
            content,
        } => {
            commands::send::run(config, topic, sender, content).await?;
        }

        Commands::History { topic } => {
            commands::history::run(config, &topic).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }

        Commands::Validate => {
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// The explicit `--config` path, or `./msgflow.toml` if it exists.
fn config_path(explicit: &Option<PathBuf>) -> Option<PathBuf> {
    explicit.clone().or_else(|| {
        let default = PathBuf::from("msgflow.toml");
        default.exists().then_some(default)
    })
}

fn load_config(path: &Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let mut config = match config_path(path) {
        Some(path) => read_config(&path)?,
        None => Config::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        msgflow_core::Error::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| msgflow_core::Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}
