//! Trait definitions for the broker module.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{BrokerError, DeliveryStream, Envelope};

/// A live session with a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Returns the name of this broker implementation.
    fn name(&self) -> &str;

    /// Declares a queue. Idempotent for identical parameters; fails with
    /// `ConfigMismatch` when the queue exists with a different durability.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError>;

    /// Starts consuming from a queue. Deliveries must be settled with
    /// [`Broker::ack`] or [`Broker::nack`].
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    /// Publishes a message. Returns once the broker has accepted it.
    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        correlation_id: Option<&str>,
    ) -> Result<(), BrokerError>;

    /// Positively acknowledges a delivery.
    async fn ack(&self, envelope: &Envelope) -> Result<(), BrokerError>;

    /// Rejects a delivery, optionally putting it back on the queue.
    async fn nack(&self, envelope: &Envelope, requeue: bool) -> Result<(), BrokerError>;
}

/// Establishes broker sessions. Each call yields a fresh instance; callers own
/// reconnect policy.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Broker>, BrokerError>;
}
