//! Mock predictor for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::predictor::{PredictionError, Predictor};
use crate::task::{Modality, PredictionValue};

/// A recorded predict call: the artifact path and the bytes it held.
#[derive(Debug, Clone)]
pub struct RecordedPrediction {
    pub artifact: PathBuf,
    pub content: Vec<u8>,
}

/// Mock implementation of the Predictor trait.
///
/// Reads the artifact it is handed (so a missing or shared file shows up in
/// assertions) and returns a fixed value.
#[derive(Debug, Clone)]
pub struct MockPredictor {
    modality: Modality,
    value: Arc<RwLock<PredictionValue>>,
    failing: Arc<AtomicBool>,
    delay: Arc<RwLock<Duration>>,
    calls: Arc<RwLock<Vec<RecordedPrediction>>>,
}

impl MockPredictor {
    /// Create a mock predictor returning `value`.
    pub fn new(modality: Modality, value: PredictionValue) -> Self {
        Self {
            modality,
            value: Arc::new(RwLock::new(value)),
            failing: Arc::new(AtomicBool::new(false)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// A predictor returning a plain label.
    pub fn label(modality: Modality, label: &str) -> Self {
        Self::new(modality, PredictionValue::Label(label.to_string()))
    }

    pub async fn set_value(&self, value: PredictionValue) {
        *self.value.write().await = value;
    }

    /// Make every call fail with `InvalidInput`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded predict calls.
    pub async fn calls(&self) -> Vec<RecordedPrediction> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl Predictor for MockPredictor {
    fn name(&self) -> &str {
        "mock"
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    async fn predict(&self, artifact: &Path) -> Result<PredictionValue, PredictionError> {
        let content = tokio::fs::read(artifact).await?;
        self.calls.write().await.push(RecordedPrediction {
            artifact: artifact.to_path_buf(),
            content,
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(PredictionError::InvalidInput(format!(
                "mock {} predictor failure",
                self.modality
            )));
        }

        Ok(self.value.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"payload").unwrap();

        let predictor = MockPredictor::label(Modality::Mri, "Negative");
        let value = predictor.predict(&path).await.unwrap();

        assert_eq!(value, PredictionValue::Label("Negative".to_string()));
        let calls = predictor.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].content, b"payload");
    }

    #[tokio::test]
    async fn test_failing_and_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"payload").unwrap();

        let predictor = MockPredictor::label(Modality::Eeg, "Negative");
        predictor.set_failing(true);
        assert!(matches!(
            predictor.predict(&path).await,
            Err(PredictionError::InvalidInput(_))
        ));
        assert!(matches!(
            predictor.predict(&dir.path().join("missing")).await,
            Err(PredictionError::Io(_))
        ));
    }
}
