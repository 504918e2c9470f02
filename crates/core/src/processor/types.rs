//! Types for the processor module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::task::{FailureStage, Modality, PredictionValue};

/// Processing stage of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Received,
    Decoding,
    Fetching,
    Predicting,
    Assembling,
    Publishing,
    Acknowledged,
    Failed,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Received => "received",
            TaskStage::Decoding => "decoding",
            TaskStage::Fetching => "fetching",
            TaskStage::Predicting => "predicting",
            TaskStage::Assembling => "assembling",
            TaskStage::Publishing => "publishing",
            TaskStage::Acknowledged => "acknowledged",
            TaskStage::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Result published, message acked.
    Completed,
    /// Undecodable message, nacked without requeue.
    Rejected,
    /// Publish failed, message nacked with requeue.
    Requeued,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::Requeued => "requeued",
        }
    }
}

/// Per-modality result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityStatus {
    Ok,
    FetchFailed,
    PredictFailed,
}

impl ModalityStatus {
    pub fn of(value: &PredictionValue) -> Self {
        match value {
            PredictionValue::Failed {
                stage: FailureStage::Fetch,
                ..
            } => ModalityStatus::FetchFailed,
            PredictionValue::Failed {
                stage: FailureStage::Predict,
                ..
            } => ModalityStatus::PredictFailed,
            _ => ModalityStatus::Ok,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModalityStatus::Ok => "ok",
            ModalityStatus::FetchFailed => "fetch_failed",
            ModalityStatus::PredictFailed => "predict_failed",
        }
    }
}

/// Summary of processing one delivery.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Absent when the message could not be decoded.
    pub request_id: Option<Uuid>,
    pub delivery_tag: u64,
    pub kind: OutcomeKind,
    pub modalities: BTreeMap<Modality, ModalityStatus>,
    /// Publish attempts made; 0 when nothing was published.
    pub publish_attempts: u32,
    /// Whether the final ack/nack reached the broker.
    pub settled: bool,
    pub duration: Duration,
}
