//! Fetcher for artifacts on a locally mounted volume.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::error::FetchError;
use super::traits::{validate_remote, FetchedArtifact, Fetcher};
use crate::config::LocalFetcherConfig;
use crate::task::RemoteArtifact;

/// Copies artifacts from a directory tree that mirrors the file server.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(config: LocalFetcherConfig) -> Self {
        Self { root: config.root }
    }

    /// Source path for a remote artifact. Remote paths are absolute on the
    /// server, so the leading separator is dropped before joining.
    pub fn source_path(&self, remote: &RemoteArtifact) -> PathBuf {
        self.root
            .join(remote.path.trim_start_matches('/'))
            .join(&remote.filename)
    }
}

#[async_trait]
impl Fetcher for LocalFetcher {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(
        &self,
        remote: &RemoteArtifact,
        local_path: &Path,
    ) -> Result<FetchedArtifact, FetchError> {
        validate_remote(remote)?;
        let source = self.source_path(remote);

        if !tokio::fs::try_exists(&source).await? {
            return Err(FetchError::NotFound {
                path: source.display().to_string(),
            });
        }

        debug!(source = %source.display(), local = %local_path.display(), "Copying artifact");

        let copied = tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| FetchError::local_write(local_path.to_path_buf(), e))?;

        let expected = tokio::fs::metadata(&source).await?.len();
        if copied != expected {
            return Err(FetchError::TransferCorrupt {
                path: source.display().to_string(),
                expected,
                received: copied,
            });
        }

        Ok(FetchedArtifact {
            local_path: local_path.to_path_buf(),
            size_bytes: copied,
        })
    }
}
