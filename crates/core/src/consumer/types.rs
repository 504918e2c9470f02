//! Types for the consumption loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::BrokerError;

/// Errors that end the consumption loop.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// A broker error that reconnecting cannot fix (queue config mismatch).
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The reconnect budget ran out.
    #[error("gave up connecting after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// `run` was called while the loop was already running.
    #[error("consumption loop already running")]
    AlreadyRunning,
}

/// Current status of the consumption loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStatus {
    /// Whether `run` is executing.
    pub running: bool,
    /// Whether a broker session is currently consuming.
    pub connected: bool,
    /// Messages currently being processed.
    pub in_flight: usize,
    /// Worker slots.
    pub concurrency: usize,
    /// Messages published and acked.
    pub completed: u64,
    /// Messages rejected as undecodable.
    pub rejected: u64,
    /// Messages requeued after publishing failed.
    pub requeued: u64,
    /// Messages aborted at the shutdown deadline and requeued.
    pub aborted: u64,
    /// Successful reconnects after a lost connection.
    pub reconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_default() {
        let status = ConsumerStatus::default();
        assert!(!status.running);
        assert!(!status.connected);
        assert_eq!(status.in_flight, 0);
    }

    #[test]
    fn test_error_display() {
        let err = ConsumerError::ReconnectExhausted {
            attempts: 3,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "gave up connecting after 3 attempts: connection refused"
        );
    }
}
