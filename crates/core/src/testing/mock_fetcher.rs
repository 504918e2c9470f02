//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::fetcher::{validate_remote, FetchError, FetchedArtifact, Fetcher};
use crate::task::RemoteArtifact;

/// A recorded fetch call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub remote: RemoteArtifact,
    pub local_path: PathBuf,
}

/// Failure to simulate for a remote filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFetchFailure {
    NotFound,
    Timeout,
    Corrupt,
}

/// Mock implementation of the Fetcher trait.
///
/// Writes the configured content (by default `"<path>/<filename>"`) to the
/// requested local path, so a test can tell which remote file a local artifact
/// came from.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    calls: Arc<RwLock<Vec<RecordedFetch>>>,
    contents: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failures: Arc<RwLock<HashMap<String, MockFetchFailure>>>,
    delay: Arc<RwLock<Duration>>,
}

impl MockFetcher {
    /// Create a new mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Content written for a remote filename.
    pub async fn set_content(&self, filename: &str, content: Vec<u8>) {
        self.contents
            .write()
            .await
            .insert(filename.to_string(), content);
    }

    /// Make every fetch of a remote filename fail.
    pub async fn set_failure(&self, filename: &str, failure: MockFetchFailure) {
        self.failures
            .write()
            .await
            .insert(filename.to_string(), failure);
    }

    /// Time each fetch takes.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded fetch calls.
    pub async fn calls(&self) -> Vec<RecordedFetch> {
        self.calls.read().await.clone()
    }

    /// Number of fetches of a remote filename.
    pub async fn call_count(&self, filename: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.remote.filename == filename)
            .count()
    }

    /// The content a fetch of `remote` writes when none was configured.
    pub fn default_content(remote: &RemoteArtifact) -> Vec<u8> {
        format!("{}/{}", remote.path, remote.filename).into_bytes()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        remote: &RemoteArtifact,
        local_path: &Path,
    ) -> Result<FetchedArtifact, FetchError> {
        validate_remote(remote)?;
        self.calls.write().await.push(RecordedFetch {
            remote: remote.clone(),
            local_path: local_path.to_path_buf(),
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let location = format!("{}/{}", remote.path, remote.filename);
        if let Some(failure) = self.failures.read().await.get(&remote.filename) {
            return Err(match failure {
                MockFetchFailure::NotFound => FetchError::NotFound { path: location },
                MockFetchFailure::Timeout => FetchError::Timeout {
                    path: location,
                    secs: 1,
                },
                MockFetchFailure::Corrupt => FetchError::TransferCorrupt {
                    path: location,
                    expected: 100,
                    received: 50,
                },
            });
        }

        let content = self
            .contents
            .read()
            .await
            .get(&remote.filename)
            .cloned()
            .unwrap_or_else(|| Self::default_content(remote));

        tokio::fs::write(local_path, &content)
            .await
            .map_err(|e| FetchError::local_write(local_path.to_path_buf(), e))?;

        Ok(FetchedArtifact {
            local_path: local_path.to_path_buf(),
            size_bytes: content.len() as u64,
        })
    }
}
