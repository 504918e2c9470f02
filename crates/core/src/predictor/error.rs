//! Error types for the predictor module.

use thiserror::Error;

/// Errors that can occur while running a predictor.
#[derive(Debug, Error)]
pub enum PredictionError {
    /// The artifact is not in the format the predictor expects.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reading an archive failed.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// No predictor is registered for the modality.
    #[error("No predictor registered for {0}")]
    Unavailable(String),

    /// The predictor task panicked or was cancelled.
    #[error("Prediction task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PredictionError {
    /// Short machine-readable kind, used for metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Archive(_) => "archive",
            Self::Unavailable(_) => "unavailable",
            Self::Task(_) => "task",
            Self::Io(_) => "io",
        }
    }
}
