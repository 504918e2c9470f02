//! Startup-time registry of predictors keyed by modality.

use std::collections::HashMap;
use std::sync::Arc;

use super::eeg::EegPredictor;
use super::mri::MriPredictor;
use super::traits::Predictor;
use crate::config::PredictorConfig;
use crate::task::Modality;

/// Maps each modality to the predictor that handles it.
#[derive(Clone, Default)]
pub struct PredictorRegistry {
    predictors: HashMap<Modality, Arc<dyn Predictor>>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in MRI and EEG predictors.
    pub fn with_defaults(config: &PredictorConfig) -> Self {
        Self::new()
            .with(Arc::new(MriPredictor::new()))
            .with(Arc::new(EegPredictor::new(config.eeg.clone())))
    }

    /// Adds a predictor, replacing any previous one for the same modality.
    pub fn with(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.register(predictor);
        self
    }

    pub fn register(&mut self, predictor: Arc<dyn Predictor>) {
        self.predictors.insert(predictor.modality(), predictor);
    }

    pub fn get(&self, modality: Modality) -> Option<Arc<dyn Predictor>> {
        self.predictors.get(&modality).cloned()
    }

    /// Registered modalities in stable order.
    pub fn modalities(&self) -> Vec<Modality> {
        Modality::ALL
            .into_iter()
            .filter(|m| self.predictors.contains_key(m))
            .collect()
    }
}

impl std::fmt::Debug for PredictorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for modality in self.modalities() {
            if let Some(predictor) = self.predictors.get(&modality) {
                map.entry(&modality, &predictor.name());
            }
        }
        map.finish()
    }
}
