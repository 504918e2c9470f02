//! Mock broker and connector for testing.

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::broker::{Broker, BrokerError, Connector, Delivery, DeliveryStream, Envelope};

/// A recorded publish for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub queue: String,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
}

impl RecordedPublish {
    /// Parses the body as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// A recorded settlement (ack or nack) for test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

type Feed = UnboundedSender<Result<Delivery, BrokerError>>;

/// Mock implementation of the Broker trait.
///
/// Provides controllable behavior for testing:
/// - Push messages before or after `consume` is called
/// - Record publishes, acks and nacks for assertions
/// - Simulate publish failures, queue mismatches and disconnects
///
/// # Example
///
/// ```rust,ignore
/// let broker = MockBroker::new();
/// let tag = broker.push_message(br#"{"mripath":"/data","mrifile":"scan.zip","eegpath":"","eegfile":""}"#);
///
/// // ... run the consumer ...
///
/// assert_eq!(broker.settlements_for(tag).await, vec![Settlement::Ack]);
/// ```
#[derive(Debug, Clone)]
pub struct MockBroker {
    /// Sender feeding the active consume stream, if any.
    feed: Arc<Mutex<Option<Feed>>>,
    /// Messages pushed while nobody was consuming.
    pending: Arc<Mutex<Vec<Delivery>>>,
    next_tag: Arc<AtomicU64>,
    publishes: Arc<RwLock<Vec<RecordedPublish>>>,
    settlements: Arc<RwLock<Vec<(u64, Settlement)>>>,
    /// Attempts to settle an envelope a second time.
    double_settles: Arc<RwLock<Vec<u64>>>,
    declared: Arc<RwLock<Vec<(String, bool)>>>,
    /// Queues that exist on the "server" before the test starts.
    existing_queues: Arc<RwLock<HashMap<String, bool>>>,
    /// Remaining publishes that should fail.
    publish_failures: Arc<AtomicU32>,
    publish_attempts: Arc<AtomicU32>,
    consume_calls: Arc<AtomicU32>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// Create a new mock broker.
    pub fn new() -> Self {
        Self {
            feed: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(Vec::new())),
            next_tag: Arc::new(AtomicU64::new(1)),
            publishes: Arc::new(RwLock::new(Vec::new())),
            settlements: Arc::new(RwLock::new(Vec::new())),
            double_settles: Arc::new(RwLock::new(Vec::new())),
            declared: Arc::new(RwLock::new(Vec::new())),
            existing_queues: Arc::new(RwLock::new(HashMap::new())),
            publish_failures: Arc::new(AtomicU32::new(0)),
            publish_attempts: Arc::new(AtomicU32::new(0)),
            consume_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Queue a message for delivery and return its delivery tag.
    pub fn push_message(&self, body: impl Into<Vec<u8>>) -> u64 {
        self.push_message_with_correlation(body, None)
    }

    /// Queue a message carrying a correlation id.
    pub fn push_message_with_correlation(
        &self,
        body: impl Into<Vec<u8>>,
        correlation_id: Option<&str>,
    ) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            envelope: Envelope::new(tag, false),
            body: body.into(),
            correlation_id: correlation_id.map(str::to_string),
        };
        self.deliver(delivery);
        tag
    }

    /// Build a delivery without queueing it, for driving the processor directly.
    pub fn make_delivery(&self, body: impl Into<Vec<u8>>) -> Delivery {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        Delivery {
            envelope: Envelope::new(tag, false),
            body: body.into(),
            correlation_id: None,
        }
    }

    fn deliver(&self, delivery: Delivery) {
        let mut feed = self.feed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = feed.as_ref() {
            match tx.unbounded_send(Ok(delivery)) {
                Ok(()) => return,
                Err(e) => {
                    *feed = None;
                    if let Ok(delivery) = e.into_inner() {
                        self.push_pending(delivery);
                    }
                    return;
                }
            }
        }
        self.push_pending(delivery);
    }

    fn push_pending(&self, delivery: Delivery) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery);
    }

    /// End the active consume stream, as a dropped connection would.
    pub fn disconnect(&self) {
        self.feed.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Emit an error on the active consume stream.
    pub fn fail_stream(&self, reason: &str) {
        let feed = self.feed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = feed.as_ref() {
            let _ = tx.unbounded_send(Err(BrokerError::Consume {
                queue: "mock".to_string(),
                reason: reason.to_string(),
            }));
        }
    }

    /// Whether a consumer is currently attached.
    pub fn is_consuming(&self) -> bool {
        self.feed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Make the next `count` publishes fail.
    pub fn fail_publishes(&self, count: u32) {
        self.publish_failures.store(count, Ordering::SeqCst);
    }

    /// Pretend a queue already exists with the given durability.
    pub async fn set_existing_queue(&self, name: &str, durable: bool) {
        self.existing_queues
            .write()
            .await
            .insert(name.to_string(), durable);
    }

    /// Successful publishes.
    pub async fn published(&self) -> Vec<RecordedPublish> {
        self.publishes.read().await.clone()
    }

    /// Total publish calls, including failed ones.
    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// All settlements in call order.
    pub async fn settlements(&self) -> Vec<(u64, Settlement)> {
        self.settlements.read().await.clone()
    }

    /// Settlements recorded for one delivery tag.
    pub async fn settlements_for(&self, tag: u64) -> Vec<Settlement> {
        self.settlements
            .read()
            .await
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Delivery tags whose envelope was settled more than once.
    pub async fn double_settles(&self) -> Vec<u64> {
        self.double_settles.read().await.clone()
    }

    /// Declared queues with their durability, in call order.
    pub async fn declared_queues(&self) -> Vec<(String, bool)> {
        self.declared.read().await.clone()
    }

    pub fn consume_calls(&self) -> u32 {
        self.consume_calls.load(Ordering::SeqCst)
    }

    async fn settle(&self, envelope: &Envelope, settlement: Settlement) -> Result<(), BrokerError> {
        if let Err(e) = envelope.mark_settled() {
            self.double_settles
                .write()
                .await
                .push(envelope.delivery_tag());
            return Err(e);
        }
        self.settlements
            .write()
            .await
            .push((envelope.delivery_tag(), settlement));
        Ok(())
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        self.declared
            .write()
            .await
            .push((name.to_string(), durable));

        let mut existing = self.existing_queues.write().await;
        match existing.get(name) {
            Some(&current) if current != durable => Err(BrokerError::ConfigMismatch {
                queue: name.to_string(),
                reason: format!(
                    "inequivalent arg 'durable': received {} but current is {}",
                    durable, current
                ),
            }),
            Some(_) => Ok(()),
            None => {
                existing.insert(name.to_string(), durable);
                Ok(())
            }
        }
    }

    async fn consume(&self, _queue: &str) -> Result<DeliveryStream, BrokerError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded();

        let pending: Vec<Delivery> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for delivery in pending {
            let _ = tx.unbounded_send(Ok(delivery));
        }

        *self.feed.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx.boxed())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        correlation_id: Option<&str>,
    ) -> Result<(), BrokerError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Publish {
                queue: queue.to_string(),
                reason: "mock publish failure".to_string(),
            });
        }

        self.publishes.write().await.push(RecordedPublish {
            queue: queue.to_string(),
            body: body.to_vec(),
            correlation_id: correlation_id.map(str::to_string),
        });
        Ok(())
    }

    async fn ack(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        self.settle(envelope, Settlement::Ack).await
    }

    async fn nack(&self, envelope: &Envelope, requeue: bool) -> Result<(), BrokerError> {
        self.settle(envelope, Settlement::Nack { requeue }).await
    }
}

/// Mock connector handing out one shared [`MockBroker`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    broker: MockBroker,
    connect_failures: Arc<AtomicU32>,
    connects: Arc<AtomicU32>,
}

impl MockConnector {
    pub fn new(broker: MockBroker) -> Self {
        Self {
            broker,
            connect_failures: Arc::new(AtomicU32::new(0)),
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn broker(&self) -> &MockBroker {
        &self.broker
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>, BrokerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Connection("mock connection refused".to_string()));
        }
        Ok(Arc::new(self.broker.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_messages_delivered_on_consume() {
        let broker = MockBroker::new();
        let first = broker.push_message("a");
        let second = broker.push_message("b");

        let mut stream = broker.consume("in").await.unwrap();
        let d1 = stream.next().await.unwrap().unwrap();
        let d2 = stream.next().await.unwrap().unwrap();
        assert_eq!(d1.envelope.delivery_tag(), first);
        assert_eq!(d2.envelope.delivery_tag(), second);
        assert_eq!(d2.body, b"b");
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let broker = MockBroker::new();
        let mut stream = broker.consume("in").await.unwrap();
        assert!(broker.is_consuming());
        broker.disconnect();
        assert!(stream.next().await.is_none());

        // Messages pushed while disconnected wait for the next consumer.
        broker.push_message("later");
        let mut stream = broker.consume("in").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().body, b"later");
        assert_eq!(broker.consume_calls(), 2);
    }

    #[tokio::test]
    async fn test_double_settle_recorded() {
        let broker = MockBroker::new();
        let delivery = broker.make_delivery("x");

        broker.ack(&delivery.envelope).await.unwrap();
        let err = broker.nack(&delivery.envelope, true).await.unwrap_err();
        assert!(matches!(err, BrokerError::AlreadySettled { .. }));

        let tag = delivery.envelope.delivery_tag();
        assert_eq!(broker.settlements_for(tag).await, vec![Settlement::Ack]);
        assert_eq!(broker.double_settles().await, vec![tag]);
    }

    #[tokio::test]
    async fn test_publish_failures_then_success() {
        let broker = MockBroker::new();
        broker.fail_publishes(2);

        assert!(broker.publish("out", b"1", None).await.is_err());
        assert!(broker.publish("out", b"1", None).await.is_err());
        assert!(broker.publish("out", b"1", Some("c-1")).await.is_ok());

        assert_eq!(broker.publish_attempts(), 3);
        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].correlation_id.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn test_declare_mismatch() {
        let broker = MockBroker::new();
        broker.set_existing_queue("in", false).await;

        assert!(matches!(
            broker.declare_queue("in", true).await,
            Err(BrokerError::ConfigMismatch { .. })
        ));
        assert!(broker.declare_queue("out", true).await.is_ok());
        assert!(broker.declare_queue("out", true).await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_failures() {
        let connector = MockConnector::new(MockBroker::new());
        connector.fail_connects(1);

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert_eq!(connector.connect_attempts(), 2);
    }
}
