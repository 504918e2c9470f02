//! Consumption loop lifecycle integration tests.
//!
//! These tests run the loop against the mock broker and connector:
//! connect -> declare -> consume -> dispatch -> drain/abort on shutdown,
//! plus reconnects and fatal startup errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::task::JoinHandle;

use aiep_core::{
    config::RetryConfig,
    testing::{fixtures, MockBroker, MockConnector, MockFetcher, MockPredictor, Settlement},
    BrokerError, ConsumerConfig, ConsumerError, ConsumptionLoop, Modality, PredictorRegistry,
    ProcessorConfig, TaskProcessor,
};

/// Test helper to create the loop and its dependencies.
struct TestHarness {
    broker: MockBroker,
    connector: MockConnector,
    mri: MockPredictor,
    consumer: Arc<ConsumptionLoop>,
    _scratch: TempDir,
}

impl TestHarness {
    fn new(configure: impl FnOnce(&mut ConsumerConfig)) -> Self {
        let scratch = TempDir::new().expect("Failed to create temp dir");
        let broker = MockBroker::new();
        let connector = MockConnector::new(broker.clone());
        let mri = MockPredictor::label(Modality::Mri, "Negative");

        let processor = TaskProcessor::new(
            ProcessorConfig {
                queue_out: "out".to_string(),
                scratch_dir: scratch.path().to_path_buf(),
                keep_artifacts: false,
                publish_retry: fast_retry(2),
            },
            Arc::new(MockFetcher::new()),
            PredictorRegistry::new().with(Arc::new(mri.clone())),
        );

        let mut config = ConsumerConfig {
            queue_in: "in".to_string(),
            queue_out: "out".to_string(),
            concurrency: 1,
            shutdown_timeout_secs: 5,
            reconnect: fast_retry(0),
        };
        configure(&mut config);

        let consumer = Arc::new(ConsumptionLoop::new(
            config,
            Arc::new(connector.clone()),
            Arc::new(processor),
        ));

        Self {
            broker,
            connector,
            mri,
            consumer,
            _scratch: scratch,
        }
    }

    fn start(&self) -> JoinHandle<Result<(), ConsumerError>> {
        let consumer = Arc::clone(&self.consumer);
        tokio::spawn(async move { consumer.run().await })
    }

    fn push_request(&self) -> u64 {
        self.broker
            .push_message(fixtures::request_body(Some(("/data", "scan.zip")), None))
    }

    async fn wait_for(&self, what: &str, condition: impl Fn(&TestHarness) -> bool) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn wait_for_settled(&self, count: usize) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if self.broker.settlements().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} settlements", count);
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 10,
        backoff_multiplier: 2.0,
    }
}

#[tokio::test]
async fn test_processes_messages_and_stops() {
    let harness = TestHarness::new(|_| {});
    let first = harness.push_request();
    let second = harness.push_request();
    let handle = harness.start();

    harness.wait_for_settled(2).await;
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(
        harness.broker.settlements_for(first).await,
        vec![Settlement::Ack]
    );
    assert_eq!(
        harness.broker.settlements_for(second).await,
        vec![Settlement::Ack]
    );

    let status = harness.consumer.status();
    assert!(!status.running);
    assert!(!status.connected);
    assert_eq!(status.completed, 2);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test]
async fn test_declares_both_queues_durable() {
    let harness = TestHarness::new(|_| {});
    let handle = harness.start();

    harness
        .wait_for("consumer attached", |h| h.broker.is_consuming())
        .await;
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(
        harness.broker.declared_queues().await,
        vec![("in".to_string(), true), ("out".to_string(), true)]
    );
}

#[tokio::test]
async fn test_poison_message_does_not_stop_loop() {
    let harness = TestHarness::new(|_| {});
    let poison = harness.broker.push_message("not json at all");
    let good = harness.push_request();
    let handle = harness.start();

    harness.wait_for_settled(2).await;
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(
        harness.broker.settlements_for(poison).await,
        vec![Settlement::Nack { requeue: false }]
    );
    assert_eq!(
        harness.broker.settlements_for(good).await,
        vec![Settlement::Ack]
    );
    let status = harness.consumer.status();
    assert_eq!(status.rejected, 1);
    assert_eq!(status.completed, 1);
}

#[tokio::test]
async fn test_concurrency_bounds_in_flight_tasks() {
    let harness = TestHarness::new(|c| c.concurrency = 2);
    harness.mri.set_delay(Duration::from_millis(150)).await;
    for _ in 0..5 {
        harness.push_request();
    }
    let handle = harness.start();

    let mut max_in_flight = 0;
    let start = Instant::now();
    while harness.broker.settlements().await.len() < 5 {
        assert!(start.elapsed() < Duration::from_secs(5), "messages not processed");
        max_in_flight = max_in_flight.max(harness.consumer.status().in_flight);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(max_in_flight, 2);
    assert_eq!(harness.mri.call_count().await, 5);
    assert!(harness.broker.double_settles().await.is_empty());
}

#[tokio::test]
async fn test_config_mismatch_is_fatal() {
    let harness = TestHarness::new(|_| {});
    harness.broker.set_existing_queue("in", false).await;

    let result = harness.start().await.unwrap();

    assert!(matches!(
        result,
        Err(ConsumerError::Broker(BrokerError::ConfigMismatch { .. }))
    ));
    assert_eq!(harness.broker.consume_calls(), 0);
    assert!(!harness.consumer.status().running);
}

#[tokio::test]
async fn test_initial_connect_retried() {
    let harness = TestHarness::new(|_| {});
    harness.connector.fail_connects(2);
    let tag = harness.push_request();
    let handle = harness.start();

    harness.wait_for_settled(1).await;
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(harness.connector.connect_attempts(), 3);
    assert_eq!(
        harness.broker.settlements_for(tag).await,
        vec![Settlement::Ack]
    );
    // The first successful connection is not a reconnect.
    assert_eq!(harness.consumer.status().reconnects, 0);
}

#[tokio::test]
async fn test_reconnect_budget_exhausted() {
    let harness = TestHarness::new(|c| c.reconnect = fast_retry(3));
    harness.connector.fail_connects(10);

    let result = harness.start().await.unwrap();

    assert!(matches!(
        result,
        Err(ConsumerError::ReconnectExhausted { attempts: 3, .. })
    ));
    assert_eq!(harness.connector.connect_attempts(), 3);
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let harness = TestHarness::new(|_| {});
    let handle = harness.start();

    harness
        .wait_for("consumer attached", |h| h.broker.is_consuming())
        .await;
    harness.broker.disconnect();

    let tag = harness.push_request();
    harness.wait_for_settled(1).await;

    assert_eq!(
        harness.broker.settlements_for(tag).await,
        vec![Settlement::Ack]
    );
    assert_eq!(harness.broker.consume_calls(), 2);
    let status = harness.consumer.status();
    assert_eq!(status.reconnects, 1);
    assert!(status.connected);

    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stream_error_triggers_reconnect() {
    let harness = TestHarness::new(|_| {});
    let handle = harness.start();

    harness
        .wait_for("consumer attached", |h| h.broker.consume_calls() == 1)
        .await;
    harness.broker.fail_stream("channel closed by server");
    harness
        .wait_for("second consumer", |h| h.broker.consume_calls() == 2)
        .await;

    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();
    assert_eq!(harness.consumer.status().reconnects, 1);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_tasks() {
    let harness = TestHarness::new(|_| {});
    harness.mri.set_delay(Duration::from_millis(200)).await;
    let tag = harness.push_request();
    let handle = harness.start();

    harness
        .wait_for("task in flight", |h| h.consumer.status().in_flight == 1)
        .await;
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    // The task finished normally instead of being aborted.
    assert_eq!(
        harness.broker.settlements_for(tag).await,
        vec![Settlement::Ack]
    );
    assert_eq!(harness.broker.published().await.len(), 1);
    assert_eq!(harness.consumer.status().aborted, 0);
}

#[tokio::test]
async fn test_shutdown_stops_pulling_new_messages() {
    let harness = TestHarness::new(|_| {});
    harness.mri.set_delay(Duration::from_millis(200)).await;
    let first = harness.push_request();
    let second = harness.push_request();
    let handle = harness.start();

    harness
        .wait_for("task in flight", |h| h.consumer.status().in_flight == 1)
        .await;
    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(
        harness.broker.settlements_for(first).await,
        vec![Settlement::Ack]
    );
    // Never dispatched; stays unacked on the broker for another worker.
    assert!(harness.broker.settlements_for(second).await.is_empty());
}

#[tokio::test]
async fn test_hard_timeout_aborts_and_requeues() {
    let harness = TestHarness::new(|c| c.shutdown_timeout_secs = 0);
    harness.mri.set_delay(Duration::from_secs(30)).await;
    let tag = harness.push_request();
    let handle = harness.start();

    harness
        .wait_for("task in flight", |h| h.consumer.status().in_flight == 1)
        .await;
    harness.consumer.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not return after the shutdown deadline")
        .unwrap()
        .unwrap();

    assert_eq!(
        harness.broker.settlements_for(tag).await,
        vec![Settlement::Nack { requeue: true }]
    );
    assert!(harness.broker.published().await.is_empty());
    let status = harness.consumer.status();
    assert_eq!(status.aborted, 1);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test]
async fn test_shutdown_before_run_returns_immediately() {
    let harness = TestHarness::new(|_| {});
    harness.consumer.shutdown();

    tokio::time::timeout(Duration::from_secs(1), harness.start())
        .await
        .expect("run did not return")
        .unwrap()
        .unwrap();
    assert_eq!(harness.connector.connect_attempts(), 0);
}

#[tokio::test]
async fn test_run_twice_rejected() {
    let harness = TestHarness::new(|_| {});
    let handle = harness.start();
    harness
        .wait_for("loop running", |h| h.consumer.status().running)
        .await;

    let second = harness.consumer.run().await;
    assert!(matches!(second, Err(ConsumerError::AlreadyRunning)));

    harness.consumer.shutdown();
    handle.await.unwrap().unwrap();
}
