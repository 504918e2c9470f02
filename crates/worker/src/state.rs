use std::sync::Arc;

use aiep_core::{Config, ConsumptionLoop, SanitizedConfig};

/// Shared state for the health endpoint handlers.
pub struct AppState {
    config: Config,
    consumer: Arc<ConsumptionLoop>,
}

impl AppState {
    pub fn new(config: Config, consumer: Arc<ConsumptionLoop>) -> Self {
        Self { config, consumer }
    }

    /// Configuration with secrets redacted.
    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn consumer(&self) -> &ConsumptionLoop {
        &self.consumer
    }
}
