//! MRI predictor.
//!
//! Placeholder model: the artifact must be a zip archive holding at least one
//! image file, and the result is always `Negative`. The contract (input
//! validation, error surface, output key) is what the rest of the worker
//! depends on; a trained model slots in behind the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::error::PredictionError;
use super::traits::Predictor;
use crate::task::{Modality, PredictionValue};

pub const NEGATIVE: &str = "Negative";

#[derive(Debug, Clone, Default)]
pub struct MriPredictor;

impl MriPredictor {
    pub fn new() -> Self {
        Self
    }
}

fn count_images(path: &Path) -> Result<usize, PredictionError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut images = 0;
    for i in 0..archive.len() {
        if !archive.by_index(i)?.is_dir() {
            images += 1;
        }
    }
    Ok(images)
}

#[async_trait]
impl Predictor for MriPredictor {
    fn name(&self) -> &str {
        "mri-placeholder"
    }

    fn modality(&self) -> Modality {
        Modality::Mri
    }

    async fn predict(&self, artifact: &Path) -> Result<PredictionValue, PredictionError> {
        let path: PathBuf = artifact.to_path_buf();
        let images = tokio::task::spawn_blocking(move || count_images(&path))
            .await
            .map_err(|e| PredictionError::Task(e.to_string()))??;

        if images == 0 {
            return Err(PredictionError::InvalidInput(
                "MRI archive contains no files".to_string(),
            ));
        }

        debug!(images, "MRI archive accepted");
        Ok(PredictionValue::Label(NEGATIVE.to_string()))
    }
}
