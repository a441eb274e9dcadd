//! Retry policies for columnar inserts and the startup connectivity probe.

use crate::config::{ClickHouseConfig, ConsumerConfig};
use crate::error::ColumnarError;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Bounded retry with linear backoff.
///
/// After failed attempt `n` (1-based) the caller sleeps `n * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
    /// Deadline covering every attempt and backoff
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            max_attempts: config.insert_max_attempts,
            step: Duration::from_millis(config.insert_backoff_step_ms),
            deadline: Duration::from_millis(config.insert_timeout_ms),
        }
    }

    /// Backoff after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step * attempt
    }

    /// Sum of every backoff the policy can sleep.
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConsumerConfig::default())
    }
}

/// Fixed-interval connectivity probe run before the consumer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupProbe {
    pub interval: Duration,
    pub deadline: Duration,
}

impl StartupProbe {
    pub fn from_config(config: &ClickHouseConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.startup_interval_ms),
            deadline: Duration::from_secs(config.startup_deadline_secs),
        }
    }

    /// Call `ping` until it succeeds.
    ///
    /// Unreachable errors are retried every `interval`; once `deadline` has
    /// elapsed the last error becomes [`Error::Startup`]. Any other error
    /// (the store answered and refused) fails immediately.
    pub async fn wait_until_ready<F, Fut>(&self, mut ping: F) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), ColumnarError>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match ping().await {
                Ok(()) => {
                    info!(attempts, "Columnar store reachable");
                    return Ok(attempts);
                }
                Err(e) if !e.is_retryable() => {
                    return Err(Error::Startup(format!("columnar store rejected ping: {e}")));
                }
                Err(e) => {
                    if started.elapsed() >= self.deadline {
                        return Err(Error::Startup(format!(
                            "columnar store unreachable after {:?}: {e}",
                            self.deadline
                        )));
                    }
                    warn!(attempt = attempts, error = %e, "Columnar store not ready yet, retrying");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

impl Default for StartupProbe {
    fn default() -> Self {
        Self::from_config(&ClickHouseConfig::default())
    }
}
