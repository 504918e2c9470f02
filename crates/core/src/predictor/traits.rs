//! Trait definitions for the predictor module.

use std::path::Path;

use async_trait::async_trait;

use super::error::PredictionError;
use crate::task::{Modality, PredictionValue};

/// Turns a local artifact of one modality into a prediction.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Returns the name of this predictor implementation.
    fn name(&self) -> &str;

    /// The modality whose artifacts this predictor understands.
    fn modality(&self) -> Modality;

    /// Runs the prediction. Implementations doing heavy work move it off the
    /// async runtime themselves.
    async fn predict(&self, artifact: &Path) -> Result<PredictionValue, PredictionError>;
}
