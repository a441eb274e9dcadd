//! Consume command: run the analytics consumer until a shutdown signal.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use msgflow_core::engine::AnalyticsConsumer;
use msgflow_core::health::HealthCheck;
use msgflow_core::metrics::PipelineMetrics;
use msgflow_core::Config;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the analytics consumer.
pub async fn run(config: Config) -> Result<()> {
    let health = Arc::new(HealthCheck::new());
    let metrics = Arc::new(PipelineMetrics::new());

    let mut consumer = AnalyticsConsumer::connect(&config, Arc::clone(&metrics), Arc::clone(&health))?;
    let shutdown_tx = consumer.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: Arc::clone(&health),
        metrics: Arc::clone(&metrics),
    });
    tokio::spawn(start_server(
        server_state,
        config.monitoring.health_port,
        config.monitoring.metrics_port,
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(wait_for_signal(shutdown_tx.clone()));

    consumer.start().await?;
    let result = consumer.run().await;

    // stop the HTTP servers when the loop ends on its own
    let _ = shutdown_tx.send(());

    result?;
    Ok(())
}

/// Forward SIGINT or SIGTERM to the consumer's shutdown channel.
async fn wait_for_signal(shutdown: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    let _ = shutdown.send(());
}
