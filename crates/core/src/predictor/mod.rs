//! Predictors turn a fetched artifact into a per-modality prediction.
//!
//! Each implementation handles one [`Modality`](crate::task::Modality) and is
//! registered once at startup in a [`PredictorRegistry`]; the task processor
//! looks predictors up by the modalities a request names.

pub mod edf;
mod eeg;
mod error;
mod mri;
mod registry;
mod traits;

pub use eeg::{classify_recording, EegPredictor};
pub use error::PredictionError;
pub use mri::MriPredictor;
pub use registry::PredictorRegistry;
pub use traits::Predictor;
