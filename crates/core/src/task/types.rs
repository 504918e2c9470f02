//! Request and result types for prediction tasks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that make an inbound message unprocessable.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message body is not a valid request: {0}")]
    Malformed(String),

    #[error("Request names no modality (every filename is empty)")]
    NoModalities,
}

/// A data channel with its own fetch and predict path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Mri,
    Eeg,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Mri, Modality::Eeg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Mri => "mri",
            Modality::Eeg => "eeg",
        }
    }

    /// Key under which this modality's prediction appears in the result.
    pub fn result_key(&self) -> &'static str {
        match self {
            Modality::Mri => "mriPred",
            Modality::Eeg => "eegPred",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file on the remote file server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    /// Directory on the server; empty means the login directory.
    pub path: String,
    pub filename: String,
}

/// Wire format of an inbound request.
#[derive(Debug, Deserialize)]
struct RequestBody {
    mripath: String,
    mrifile: String,
    eegpath: String,
    eegfile: String,
}

/// A decoded, validated prediction request.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Identifier generated at decode time; namespaces local artifacts.
    pub id: Uuid,
    /// Correlation id of the inbound message, if the sender set one.
    pub correlation_id: Option<String>,
    /// Requested modalities only.
    pub artifacts: BTreeMap<Modality, RemoteArtifact>,
}

impl TaskRequest {
    /// Decodes and validates a message body.
    ///
    /// The body must be a JSON object with string fields `mripath`, `mrifile`,
    /// `eegpath` and `eegfile`; unknown fields are ignored. A modality is
    /// requested when its filename is non-empty, and at least one must be.
    pub fn decode(body: &[u8], correlation_id: Option<String>) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(body).map_err(|_| DecodeError::InvalidUtf8)?;
        let raw: RequestBody =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let mut artifacts = BTreeMap::new();
        for (modality, path, filename) in [
            (Modality::Mri, raw.mripath, raw.mrifile),
            (Modality::Eeg, raw.eegpath, raw.eegfile),
        ] {
            if !filename.is_empty() {
                artifacts.insert(modality, RemoteArtifact { path, filename });
            }
        }

        if artifacts.is_empty() {
            return Err(DecodeError::NoModalities);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            correlation_id,
            artifacts,
        })
    }

    pub fn modalities(&self) -> impl Iterator<Item = Modality> + '_ {
        self.artifacts.keys().copied()
    }
}

/// Processing stage a modality failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Predict,
}

/// Prediction outcome for one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionValue {
    /// A single classification such as `"Negative"`.
    Label(String),
    /// Per-window classification of time series recordings.
    Segments {
        label: String,
        #[serde(rename = "windowSecs")]
        window_secs: u32,
        /// File name → one 0/1 entry per window, in chronological order.
        files: BTreeMap<String, Vec<u8>>,
    },
    /// The modality was requested but could not be predicted.
    Failed { stage: FailureStage, error: String },
}

impl PredictionValue {
    pub fn failed(stage: FailureStage, error: impl ToString) -> Self {
        Self::Failed {
            stage,
            error: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Combined result published for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskResult {
    entries: BTreeMap<String, PredictionValue>,
}

impl TaskResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, modality: Modality, value: PredictionValue) {
        self.entries.insert(modality.result_key().to_string(), value);
    }

    pub fn get(&self, modality: Modality) -> Option<&PredictionValue> {
        self.entries.get(modality.result_key())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
