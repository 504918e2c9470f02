//! Trait definitions for the fetcher module.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::FetchError;
use crate::task::RemoteArtifact;

/// A file that has been written to local scratch storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

/// Retrieves remote artifacts into local files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Copies `remote` to `local_path`. The parent directory of `local_path`
    /// must already exist.
    async fn fetch(
        &self,
        remote: &RemoteArtifact,
        local_path: &Path,
    ) -> Result<FetchedArtifact, FetchError>;
}

/// Rejects requests no backend should attempt.
///
/// An empty filename means the modality was not requested; callers skip those
/// before fetching, so reaching a fetcher with one is a caller bug.
pub fn validate_remote(remote: &RemoteArtifact) -> Result<(), FetchError> {
    if remote.filename.is_empty() {
        return Err(FetchError::InvalidRequest(
            "remote filename is empty".to_string(),
        ));
    }
    if remote.filename.contains('/') || remote.filename.contains('\\') {
        return Err(FetchError::InvalidRequest(format!(
            "remote filename {:?} must not contain path separators",
            remote.filename
        )));
    }
    let traverses = remote
        .path
        .split(|c: char| c == '/' || c == '\\')
        .any(|part| part == "..");
    if remote.filename == ".." || traverses {
        return Err(FetchError::InvalidRequest(format!(
            "remote location {:?}/{:?} must not contain '..'",
            remote.path, remote.filename
        )));
    }
    Ok(())
}
