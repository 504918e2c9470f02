//! Types for message broker operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use thiserror::Error;

use crate::retry::IsRetryable;

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Queue {queue} exists with incompatible settings: {reason}")]
    ConfigMismatch { queue: String, reason: String },

    #[error("Publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Consume from {queue} failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("Acknowledgement failed for delivery {delivery_tag}: {reason}")]
    Acknowledge { delivery_tag: u64, reason: String },

    /// A second ack/nack was attempted for the same envelope.
    #[error("Delivery {delivery_tag} was already acknowledged")]
    AlreadySettled { delivery_tag: u64 },
}

impl IsRetryable for BrokerError {
    fn is_retryable(&self) -> bool {
        match self {
            BrokerError::Connection(_) | BrokerError::Publish { .. } => true,
            BrokerError::Consume { .. } => true,
            BrokerError::ConfigMismatch { .. } => false,
            BrokerError::Acknowledge { .. } => false,
            BrokerError::AlreadySettled { .. } => false,
        }
    }
}

/// Handle for exactly one inbound message.
///
/// Clones share the settled flag, so an envelope tracked by the consumption
/// loop and the copy owned by the processing task agree on whether it has
/// been acked or nacked.
#[derive(Debug, Clone)]
pub struct Envelope {
    delivery_tag: u64,
    redelivered: bool,
    settled: Arc<AtomicBool>,
}

impl Envelope {
    pub fn new(delivery_tag: u64, redelivered: bool) -> Self {
        Self {
            delivery_tag,
            redelivered,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    /// Marks the envelope as acked or nacked.
    ///
    /// Broker implementations call this before talking to the server; a second
    /// call returns `AlreadySettled`.
    pub fn mark_settled(&self) -> Result<(), BrokerError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadySettled {
                delivery_tag: self.delivery_tag,
            });
        }
        Ok(())
    }
}

/// One inbound message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub body: Vec<u8>,
    /// AMQP `correlation_id` property, echoed on the result message.
    pub correlation_id: Option<String>,
}

/// Infinite stream of deliveries from one queue. Ends when the connection does.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_settles_once() {
        let envelope = Envelope::new(7, false);
        assert!(!envelope.is_settled());
        assert!(envelope.mark_settled().is_ok());
        assert!(envelope.is_settled());

        let err = envelope.mark_settled().unwrap_err();
        assert!(matches!(err, BrokerError::AlreadySettled { delivery_tag: 7 }));
    }

    #[test]
    fn test_envelope_clones_share_state() {
        let envelope = Envelope::new(1, true);
        let tracked = envelope.clone();
        envelope.mark_settled().unwrap();
        assert!(tracked.is_settled());
        assert!(tracked.mark_settled().is_err());
        assert!(tracked.redelivered());
    }

    #[test]
    fn test_retry_classification() {
        let publish = BrokerError::Publish {
            queue: "out".to_string(),
            reason: "channel closed".to_string(),
        };
        assert!(publish.is_retryable());
        assert!(!BrokerError::AlreadySettled { delivery_tag: 1 }.is_retryable());
        assert!(!BrokerError::ConfigMismatch {
            queue: "in".to_string(),
            reason: "durable".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = BrokerError::ConfigMismatch {
            queue: "my-predictions".to_string(),
            reason: "inequivalent arg 'durable'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Queue my-predictions exists with incompatible settings: inequivalent arg 'durable'"
        );
    }
}
