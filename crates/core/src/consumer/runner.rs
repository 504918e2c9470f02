//! Consumption loop implementation.
//!
//! One task pulls deliveries; each delivery is processed in its own spawned
//! task holding one of `concurrency` semaphore permits. The permit is taken
//! before the next delivery is pulled, so at most `concurrency` messages are
//! ever unsettled on this worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, Connector, Delivery, DeliveryStream, Envelope};
use crate::metrics;
use crate::processor::{OutcomeKind, TaskProcessor};
use crate::retry::Backoff;

use super::config::ConsumerConfig;
use super::types::{ConsumerError, ConsumerStatus};

/// Totals since startup.
#[derive(Default)]
struct LoopStats {
    completed: AtomicU64,
    rejected: AtomicU64,
    requeued: AtomicU64,
    aborted: AtomicU64,
    reconnects: AtomicU64,
}

impl LoopStats {
    fn record(&self, kind: OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Completed => &self.completed,
            OutcomeKind::Rejected => &self.rejected,
            OutcomeKind::Requeued => &self.requeued,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// An envelope being processed, with the session it arrived on.
struct InFlight {
    envelope: Envelope,
    broker: Arc<dyn Broker>,
}

type InFlightMap = Arc<Mutex<HashMap<u64, InFlight>>>;

/// Why the inner consume loop stopped.
enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Pulls messages from the inbound queue and dispatches them to the processor.
pub struct ConsumptionLoop {
    config: ConsumerConfig,
    connector: Arc<dyn Connector>,
    processor: Arc<TaskProcessor>,

    // Runtime state
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    stats: Arc<LoopStats>,
    in_flight: InFlightMap,
    next_task_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl ConsumptionLoop {
    /// Create a new consumption loop.
    pub fn new(
        config: ConsumerConfig,
        connector: Arc<dyn Connector>,
        processor: Arc<TaskProcessor>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            connector,
            processor,
            running: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(LoopStats::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_task_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Runs until [`shutdown`](Self::shutdown) is called or a fatal error occurs.
    ///
    /// Returns once in-flight tasks have drained or been aborted. A shutdown
    /// requested before `run` starts makes it return immediately.
    pub async fn run(&self) -> Result<(), ConsumerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConsumerError::AlreadyRunning);
        }

        info!(
            queue_in = %self.config.queue_in,
            queue_out = %self.config.queue_out,
            concurrency = self.config.concurrency,
            "Starting consumption loop"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        let result = self
            .consume_until_shutdown(&mut shutdown_rx, &semaphore, &mut tasks)
            .await;

        self.connected.store(false, Ordering::SeqCst);
        self.drain(&mut tasks).await;
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => info!("Consumption loop stopped"),
            Err(e) => error!(error = %e, "Consumption loop failed"),
        }
        result
    }

    /// Stops pulling new messages. In-flight tasks drain for up to the
    /// configured timeout, then are aborted and their messages requeued.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Get current loop status.
    pub fn status(&self) -> ConsumerStatus {
        ConsumerStatus {
            running: self.running.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            in_flight: self.in_flight_count(),
            concurrency: self.config.concurrency,
            completed: self.stats.completed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            requeued: self.stats.requeued.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
        }
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    async fn consume_until_shutdown(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), ConsumerError> {
        let mut backoff = Backoff::new(&self.config.reconnect);
        let mut failures = 0u32;
        let mut has_connected = false;

        loop {
            let session = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown_rx) => return Ok(()),
                session = self.open_session() => session,
            };

            let (broker, stream) = match session {
                Ok(session) => session,
                Err(e @ BrokerError::ConfigMismatch { .. }) => {
                    error!(error = %e, "Queue configuration mismatch");
                    return Err(e.into());
                }
                Err(e) => {
                    failures += 1;
                    let max = self.config.reconnect.max_attempts;
                    if max != 0 && failures >= max {
                        return Err(ConsumerError::ReconnectExhausted {
                            attempts: failures,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Broker connection failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(shutdown_rx) => return Ok(()),
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if has_connected {
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                metrics::RECONNECTS.inc();
                info!(broker = broker.name(), "Reconnected to broker");
            } else {
                info!(broker = broker.name(), "Connected to broker");
            }
            has_connected = true;
            failures = 0;
            backoff.reset(&self.config.reconnect);
            self.connected.store(true, Ordering::SeqCst);

            let end = self
                .consume_session(broker, stream, shutdown_rx, semaphore, tasks)
                .await;
            self.connected.store(false, Ordering::SeqCst);

            match end {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::ConnectionLost => {
                    warn!("Broker connection lost, reconnecting");
                }
            }
        }
    }

    /// Connects, declares both queues durable and starts consuming.
    async fn open_session(&self) -> Result<(Arc<dyn Broker>, DeliveryStream), BrokerError> {
        let broker = self.connector.connect().await?;
        broker.declare_queue(&self.config.queue_in, true).await?;
        broker.declare_queue(&self.config.queue_out, true).await?;
        let stream = broker.consume(&self.config.queue_in).await?;
        Ok((broker, stream))
    }

    async fn consume_session(
        &self,
        broker: Arc<dyn Broker>,
        mut stream: DeliveryStream,
        shutdown_rx: &mut watch::Receiver<bool>,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) -> SessionEnd {
        loop {
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(shutdown_rx) => return SessionEnd::Shutdown,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                    permit = Arc::clone(semaphore).acquire_owned() => match permit {
                        Ok(permit) => break permit,
                        Err(_) => return SessionEnd::Shutdown,
                    },
                }
            };

            let next = loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(shutdown_rx) => return SessionEnd::Shutdown,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                    next = stream.next() => break next,
                }
            };

            match next {
                Some(Ok(delivery)) => self.dispatch(tasks, Arc::clone(&broker), delivery, permit),
                Some(Err(e)) => {
                    warn!(error = %e, "Delivery stream failed");
                    return SessionEnd::ConnectionLost;
                }
                None => {
                    warn!("Delivery stream ended");
                    return SessionEnd::ConnectionLost;
                }
            }
        }
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<()>,
        broker: Arc<dyn Broker>,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
    ) {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let delivery_tag = delivery.envelope.delivery_tag();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.insert(
                task_id,
                InFlight {
                    envelope: delivery.envelope.clone(),
                    broker: Arc::clone(&broker),
                },
            );
            metrics::TASKS_IN_FLIGHT.set(in_flight.len() as i64);
        }
        debug!(task_id, delivery_tag, "Dispatching delivery");

        let processor = Arc::clone(&self.processor);
        let in_flight = Arc::clone(&self.in_flight);
        let stats = Arc::clone(&self.stats);

        tasks.spawn(async move {
            let _permit = permit;
            let outcome = processor.process(broker.as_ref(), delivery).await;
            stats.record(outcome.kind);

            let mut in_flight = in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.remove(&task_id);
            metrics::TASKS_IN_FLIGHT.set(in_flight.len() as i64);
        });
    }

    /// Waits for in-flight tasks, aborting and requeueing what is left at the deadline.
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        let timeout = self.config.shutdown_timeout();
        info!(
            in_flight = tasks.len(),
            timeout_secs = timeout.as_secs(),
            "Draining in-flight tasks"
        );

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_ok() {
            info!("All in-flight tasks finished");
            return;
        }

        warn!(
            remaining = tasks.len(),
            "Shutdown timeout reached, aborting in-flight tasks"
        );
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        let leftovers: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let leftovers = in_flight.drain().map(|(_, entry)| entry).collect();
            metrics::TASKS_IN_FLIGHT.set(0);
            leftovers
        };

        for entry in leftovers {
            if entry.envelope.is_settled() {
                continue;
            }
            let delivery_tag = entry.envelope.delivery_tag();
            match entry.broker.nack(&entry.envelope, true).await {
                Ok(()) => info!(delivery_tag, "Requeued aborted message"),
                Err(e) => warn!(delivery_tag, error = %e, "Failed to requeue aborted message"),
            }
            self.stats.aborted.fetch_add(1, Ordering::Relaxed);
            metrics::TASK_OUTCOMES.with_label_values(&["aborted"]).inc();
        }
    }
}

/// Resolves once shutdown has been requested.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Sender gone: nobody can request shutdown any more.
            std::future::pending::<()>().await;
        }
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Task processing panicked");
        } else {
            debug!(error = %e, "Task processing cancelled");
        }
    }
}
