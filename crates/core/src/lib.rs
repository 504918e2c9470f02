pub mod broker;
pub mod config;
pub mod consumer;
pub mod fetcher;
pub mod metrics;
pub mod predictor;
pub mod processor;
pub mod retry;
pub mod task;
pub mod testing;

pub use broker::{AmqpConnector, Broker, BrokerError, Connector, Delivery, Envelope};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use consumer::{ConsumerConfig, ConsumerError, ConsumerStatus, ConsumptionLoop};
pub use fetcher::{create_fetcher, FetchError, Fetcher};
pub use predictor::{PredictionError, Predictor, PredictorRegistry};
pub use processor::{OutcomeKind, ProcessorConfig, TaskOutcome, TaskProcessor};
pub use task::{Modality, PredictionValue, TaskRequest, TaskResult};
