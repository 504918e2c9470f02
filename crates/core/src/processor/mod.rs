//! Processor module: one delivery in, one result out.
//!
//! `TaskProcessor` decodes the message, fetches and predicts every requested
//! modality concurrently, publishes the assembled result and only then acks.
//! Per-modality failures are recorded in the result; decode failures reject
//! the message; publish failures requeue it.
//!
//! # Example
//!
//! ```ignore
//! use aiep_core::processor::{ProcessorConfig, TaskProcessor};
//! use aiep_core::predictor::PredictorRegistry;
//!
//! let processor = TaskProcessor::new(
//!     ProcessorConfig::from_config(&config),
//!     create_fetcher(&config.fetcher)?,
//!     PredictorRegistry::with_defaults(&config.predictor),
//! );
//!
//! let outcome = processor.process(broker.as_ref(), delivery).await;
//! println!("{:?}", outcome.kind);
//! ```

mod config;
mod pipeline;
mod types;

pub use config::ProcessorConfig;
pub use pipeline::TaskProcessor;
pub use types::{ModalityStatus, OutcomeKind, TaskOutcome, TaskStage};
