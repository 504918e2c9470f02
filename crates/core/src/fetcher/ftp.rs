//! FTP fetcher backed by `suppaftp`.
//!
//! The blocking client runs on tokio's blocking pool; a whole transfer
//! (connect, login, SIZE, RETR) is bounded by `timeout_secs`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::{types::FileType, FtpError, FtpStream, Status};
use tracing::{debug, warn};

use super::error::FetchError;
use super::traits::{validate_remote, FetchedArtifact, Fetcher};
use crate::config::FtpConfig;
use crate::task::RemoteArtifact;

/// Downloads artifacts from an FTP server.
#[derive(Debug, Clone)]
pub struct FtpFetcher {
    config: FtpConfig,
}

impl FtpFetcher {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}

fn display_path(remote: &RemoteArtifact) -> String {
    if remote.path.is_empty() {
        remote.filename.clone()
    } else {
        format!("{}/{}", remote.path.trim_end_matches('/'), remote.filename)
    }
}

fn map_ftp_error(error: FtpError, path: &str) -> FetchError {
    match error {
        FtpError::UnexpectedResponse(response)
            if matches!(response.status, Status::FileUnavailable) =>
        {
            FetchError::NotFound {
                path: path.to_string(),
            }
        }
        FtpError::ConnectionError(e) => FetchError::Connection(e.to_string()),
        other => FetchError::Remote(other.to_string()),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, FetchError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| FetchError::Connection(format!("cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| FetchError::Connection(format!("no address for {}:{}", host, port)))
}

/// Runs one complete transfer on the calling (blocking) thread.
fn download_blocking(
    config: &FtpConfig,
    remote: &RemoteArtifact,
    local_path: &Path,
) -> Result<FetchedArtifact, FetchError> {
    let path = display_path(remote);
    let addr = resolve(&config.host, config.port)?;

    let mut ftp = FtpStream::connect_timeout(addr, Duration::from_secs(config.timeout_secs))
        .map_err(|e| FetchError::Connection(e.to_string()))?;
    ftp.login(config.user.as_str(), config.password.as_str())
        .map_err(|e| FetchError::Connection(format!("login as {} failed: {}", config.user, e)))?;
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| map_ftp_error(e, &path))?;

    if !remote.path.is_empty() {
        ftp.cwd(remote.path.as_str())
            .map_err(|e| map_ftp_error(e, &path))?;
    }

    // SIZE is optional in RFC 3659; without it the length check is skipped.
    let expected = match ftp.size(remote.filename.as_str()) {
        Ok(size) => Some(size as u64),
        Err(FtpError::UnexpectedResponse(response))
            if matches!(response.status, Status::FileUnavailable) =>
        {
            return Err(FetchError::NotFound { path });
        }
        Err(e) => {
            debug!(path = %path, error = %e, "SIZE not available");
            None
        }
    };

    let data = ftp
        .retr_as_buffer(remote.filename.as_str())
        .map_err(|e| map_ftp_error(e, &path))?
        .into_inner();

    if let Err(e) = ftp.quit() {
        warn!(error = %e, "FTP QUIT failed");
    }

    let received = data.len() as u64;
    if let Some(expected) = expected {
        if expected != received {
            return Err(FetchError::TransferCorrupt {
                path,
                expected,
                received,
            });
        }
    }

    std::fs::write(local_path, &data)
        .map_err(|e| FetchError::local_write(local_path.to_path_buf(), e))?;

    Ok(FetchedArtifact {
        local_path: local_path.to_path_buf(),
        size_bytes: received,
    })
}

#[async_trait]
impl Fetcher for FtpFetcher {
    fn name(&self) -> &str {
        "ftp"
    }

    async fn fetch(
        &self,
        remote: &RemoteArtifact,
        local_path: &Path,
    ) -> Result<FetchedArtifact, FetchError> {
        validate_remote(remote)?;

        let config = self.config.clone();
        let remote_owned = remote.clone();
        let local: PathBuf = local_path.to_path_buf();
        let timeout = self.timeout();

        debug!(
            host = %self.config.host,
            path = %display_path(remote),
            local = %local_path.display(),
            "Fetching over FTP"
        );

        let transfer =
            tokio::task::spawn_blocking(move || download_blocking(&config, &remote_owned, &local));

        match tokio::time::timeout(timeout, transfer).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(FetchError::Io(std::io::Error::other(format!(
                "FTP transfer task failed: {}",
                join_error
            )))),
            Err(_) => {
                // The blocking transfer keeps running until its own socket
                // timeout; drop whatever it may still write.
                let _ = tokio::fs::remove_file(local_path).await;
                Err(FetchError::Timeout {
                    path: display_path(remote),
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}
