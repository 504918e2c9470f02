//! Consumption loop configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{Config, RetryConfig, WorkerConfig};

/// Configuration for the consumption loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Queue requests are consumed from.
    pub queue_in: String,

    /// Queue results are published to; declared at startup alongside `queue_in`.
    pub queue_out: String,

    /// Worker slots. Each processes one message at a time.
    pub concurrency: usize,

    /// How long in-flight tasks may drain after shutdown before being aborted.
    pub shutdown_timeout_secs: u64,

    /// Backoff between connection attempts. `max_attempts = 0` retries forever.
    pub reconnect: RetryConfig,
}

impl ConsumerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_in: config.broker.queue_in.clone(),
            queue_out: config.broker.queue_out.clone(),
            ..Self::from_worker(&config.worker)
        }
    }

    fn from_worker(worker: &WorkerConfig) -> Self {
        Self {
            queue_in: "my-predictions".to_string(),
            queue_out: "my-predictions-anws".to_string(),
            concurrency: worker.concurrency.max(1),
            shutdown_timeout_secs: worker.shutdown_timeout_secs,
            reconnect: worker.reconnect.clone(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from_worker(&WorkerConfig::default())
    }
}
