//! Prediction task data model: the decoded request and the assembled result.

mod types;

pub use types::{
    DecodeError, FailureStage, Modality, PredictionValue, RemoteArtifact, TaskRequest, TaskResult,
};
