//! Fetcher module for retrieving remote artifacts into scratch storage.
//!
//! # Backends
//!
//! - `FtpFetcher`: downloads from the exam file server over FTP, checking the
//!   received length against `SIZE`
//! - `LocalFetcher`: copies from a mounted directory that mirrors the server
//!
//! Use [`create_fetcher`] to build the backend selected in configuration.

mod error;
mod ftp;
mod local;
mod traits;

use std::sync::Arc;

pub use error::FetchError;
pub use ftp::FtpFetcher;
pub use local::LocalFetcher;
pub use traits::{validate_remote, FetchedArtifact, Fetcher};

use crate::config::{ConfigError, FetcherBackend, FetcherConfig};

/// Builds the fetcher selected by `config.backend`.
pub fn create_fetcher(config: &FetcherConfig) -> Result<Arc<dyn Fetcher>, ConfigError> {
    match config.backend {
        FetcherBackend::Ftp => {
            let ftp = config.ftp.clone().ok_or_else(|| {
                ConfigError::ValidationError("fetcher.ftp section missing".to_string())
            })?;
            Ok(Arc::new(FtpFetcher::new(ftp)))
        }
        FetcherBackend::Local => {
            let local = config.local.clone().ok_or_else(|| {
                ConfigError::ValidationError("fetcher.local section missing".to_string())
            })?;
            Ok(Arc::new(LocalFetcher::new(local)))
        }
    }
}
