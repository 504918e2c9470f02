//! Configuration for the processor module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{BrokerConfig, Config, RetryConfig, WorkerConfig};

/// Configuration for the task processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Queue results are published to.
    pub queue_out: String,

    /// Parent directory of the per-request artifact directories.
    pub scratch_dir: PathBuf,

    /// Leave fetched artifacts on disk after processing.
    pub keep_artifacts: bool,

    /// Backoff for publishing results.
    pub publish_retry: RetryConfig,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self::from_parts(&config.broker, &config.worker)
    }

    fn from_parts(broker: &BrokerConfig, worker: &WorkerConfig) -> Self {
        Self {
            queue_out: broker.queue_out.clone(),
            scratch_dir: worker.scratch_dir.clone(),
            keep_artifacts: worker.keep_artifacts,
            publish_retry: worker.publish_retry.clone(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_parts(&BrokerConfig::default(), &WorkerConfig::default())
    }
}
