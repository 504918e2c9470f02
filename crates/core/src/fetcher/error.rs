//! Error types for the fetcher module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while retrieving a remote artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested file does not exist on the remote side.
    #[error("Remote file not found: {path}")]
    NotFound { path: String },

    /// The transfer did not finish within the configured time.
    #[error("Transfer of {path} timed out after {secs}s")]
    Timeout { path: String, secs: u64 },

    /// The received data does not match what the server announced.
    #[error("Transfer of {path} corrupt: expected {expected} bytes, received {received}")]
    TransferCorrupt {
        path: String,
        expected: u64,
        received: u64,
    },

    /// The request itself is unusable (empty filename, path traversal).
    #[error("Invalid fetch request: {0}")]
    InvalidRequest(String),

    /// Could not reach or log in to the remote server.
    #[error("Connection to file server failed: {0}")]
    Connection(String),

    /// The server refused a command.
    #[error("File server error: {0}")]
    Remote(String),

    /// Writing the local artifact failed.
    #[error("Failed to write local artifact {path}")]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn local_write(path: PathBuf, source: std::io::Error) -> Self {
        Self::LocalWrite { path, source }
    }

    /// Short machine-readable kind, used for metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::TransferCorrupt { .. } => "transfer_corrupt",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Connection(_) => "connection",
            Self::Remote(_) => "remote",
            Self::LocalWrite { .. } | Self::Io(_) => "io",
        }
    }
}
