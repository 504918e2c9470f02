//! Task processor implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, Delivery, Envelope};
use crate::fetcher::Fetcher;
use crate::metrics;
use crate::predictor::{PredictionError, PredictorRegistry};
use crate::retry::retry_with_backoff;
use crate::task::{FailureStage, Modality, PredictionValue, RemoteArtifact, TaskRequest, TaskResult};

use super::config::ProcessorConfig;
use super::types::{ModalityStatus, OutcomeKind, TaskOutcome, TaskStage};

/// Turns one delivery into one published result and exactly one settlement.
pub struct TaskProcessor {
    config: ProcessorConfig,
    fetcher: Arc<dyn Fetcher>,
    predictors: PredictorRegistry,
}

impl TaskProcessor {
    /// Creates a new task processor.
    pub fn new(
        config: ProcessorConfig,
        fetcher: Arc<dyn Fetcher>,
        predictors: PredictorRegistry,
    ) -> Self {
        Self {
            config,
            fetcher,
            predictors,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Local path of one modality's artifact for one request.
    pub fn artifact_path(
        &self,
        request: &TaskRequest,
        modality: Modality,
        filename: &str,
    ) -> PathBuf {
        self.request_dir(request)
            .join(format!("{}-{}", modality.as_str(), filename))
    }

    fn request_dir(&self, request: &TaskRequest) -> PathBuf {
        self.config.scratch_dir.join(request.id.to_string())
    }

    /// Processes a delivery to completion.
    ///
    /// The envelope is settled exactly once: acked after the result was
    /// published, nacked without requeue when the body cannot be decoded, and
    /// nacked with requeue when publishing keeps failing.
    pub async fn process(&self, broker: &dyn Broker, delivery: Delivery) -> TaskOutcome {
        let start = Instant::now();
        let envelope = delivery.envelope;
        let delivery_tag = envelope.delivery_tag();
        metrics::MESSAGES_RECEIVED.inc();

        debug!(
            delivery_tag,
            redelivered = envelope.redelivered(),
            bytes = delivery.body.len(),
            stage = %TaskStage::Received,
            "Message received"
        );

        debug!(delivery_tag, stage = %TaskStage::Decoding, "Decoding request");
        let request = match TaskRequest::decode(&delivery.body, delivery.correlation_id) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    delivery_tag,
                    error = %e,
                    stage = %TaskStage::Failed,
                    "Rejecting undecodable message"
                );
                let settled = settle(broker, &envelope, Settle::Nack { requeue: false }).await;
                return finish(
                    None,
                    delivery_tag,
                    OutcomeKind::Rejected,
                    BTreeMap::new(),
                    0,
                    settled,
                    start,
                );
            }
        };

        let request_id = request.id;
        info!(
            %request_id,
            delivery_tag,
            modalities = ?request.modalities().collect::<Vec<_>>(),
            "Processing request"
        );

        let values = join_all(
            request
                .artifacts
                .iter()
                .map(|(modality, remote)| self.run_modality(&request, *modality, remote)),
        )
        .await;

        if !self.config.keep_artifacts {
            remove_request_dir(&self.request_dir(&request)).await;
        }

        debug!(%request_id, delivery_tag, stage = %TaskStage::Assembling, "Assembling result");
        let mut result = TaskResult::new();
        let mut statuses = BTreeMap::new();
        for (modality, value) in values {
            let status = ModalityStatus::of(&value);
            metrics::MODALITY_RESULTS
                .with_label_values(&[modality.as_str(), status.as_str()])
                .inc();
            statuses.insert(modality, status);
            result.insert(modality, value);
        }

        let body = match result.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(%request_id, delivery_tag, error = %e, "Failed to encode result");
                let settled = settle(broker, &envelope, Settle::Nack { requeue: false }).await;
                return finish(
                    Some(request_id),
                    delivery_tag,
                    OutcomeKind::Rejected,
                    statuses,
                    0,
                    settled,
                    start,
                );
            }
        };

        debug!(%request_id, delivery_tag, stage = %TaskStage::Publishing, "Publishing result");
        let queue_out = self.config.queue_out.as_str();
        let correlation_id = request.correlation_id.as_deref();
        let mut attempts = 0u32;
        let published = retry_with_backoff(&self.config.publish_retry, "publish_result", |attempt| {
            attempts = attempt;
            if attempt > 1 {
                metrics::PUBLISH_RETRIES.inc();
            }
            broker.publish(queue_out, &body, correlation_id)
        })
        .await;

        match published {
            Ok(()) => {
                let settled = settle(broker, &envelope, Settle::Ack).await;
                if settled {
                    debug!(
                        %request_id,
                        delivery_tag,
                        stage = %TaskStage::Acknowledged,
                        "Message acknowledged"
                    );
                }
                info!(
                    %request_id,
                    delivery_tag,
                    queue = queue_out,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Result published"
                );
                finish(
                    Some(request_id),
                    delivery_tag,
                    OutcomeKind::Completed,
                    statuses,
                    attempts,
                    settled,
                    start,
                )
            }
            Err((e, _)) => {
                error!(
                    %request_id,
                    delivery_tag,
                    error = %e,
                    attempts,
                    stage = %TaskStage::Failed,
                    "Publishing failed, requeueing message"
                );
                let settled = settle(broker, &envelope, Settle::Nack { requeue: true }).await;
                finish(
                    Some(request_id),
                    delivery_tag,
                    OutcomeKind::Requeued,
                    statuses,
                    attempts,
                    settled,
                    start,
                )
            }
        }
    }

    /// Fetches and predicts one modality. Failures become a `Failed` value.
    async fn run_modality(
        &self,
        request: &TaskRequest,
        modality: Modality,
        remote: &RemoteArtifact,
    ) -> (Modality, PredictionValue) {
        let request_id = request.id;

        let Some(predictor) = self.predictors.get(modality) else {
            let e = PredictionError::Unavailable(modality.to_string());
            warn!(%request_id, %modality, error = %e, "Skipping modality");
            metrics::PREDICTION_ERRORS.with_label_values(&[e.kind()]).inc();
            return (modality, PredictionValue::failed(FailureStage::Predict, e));
        };

        debug!(
            %request_id,
            %modality,
            remote_path = %remote.path,
            remote_file = %remote.filename,
            stage = %TaskStage::Fetching,
            "Fetching artifact"
        );
        let local_path = self.artifact_path(request, modality, &remote.filename);
        let fetch_start = Instant::now();
        let fetched = match prepare_dir(&local_path).await {
            Ok(()) => self.fetcher.fetch(remote, &local_path).await,
            Err(e) => Err(e),
        };
        metrics::STAGE_DURATION
            .with_label_values(&[modality.as_str(), "fetch"])
            .observe(fetch_start.elapsed().as_secs_f64());

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(%request_id, %modality, error = %e, "Fetch failed");
                metrics::FETCH_ERRORS.with_label_values(&[e.kind()]).inc();
                return (modality, PredictionValue::failed(FailureStage::Fetch, e));
            }
        };

        debug!(
            %request_id,
            %modality,
            predictor = predictor.name(),
            size_bytes = fetched.size_bytes,
            stage = %TaskStage::Predicting,
            "Running predictor"
        );
        let predict_start = Instant::now();
        let predicted = predictor.predict(&fetched.local_path).await;
        metrics::STAGE_DURATION
            .with_label_values(&[modality.as_str(), "predict"])
            .observe(predict_start.elapsed().as_secs_f64());

        match predicted {
            Ok(value) => (modality, value),
            Err(e) => {
                warn!(%request_id, %modality, error = %e, "Prediction failed");
                metrics::PREDICTION_ERRORS.with_label_values(&[e.kind()]).inc();
                (modality, PredictionValue::failed(FailureStage::Predict, e))
            }
        }
    }
}

async fn prepare_dir(local_path: &Path) -> Result<(), crate::fetcher::FetchError> {
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| crate::fetcher::FetchError::local_write(parent.to_path_buf(), e))?;
    }
    Ok(())
}

async fn remove_request_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove artifacts"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Ack,
    Nack { requeue: bool },
}

/// Acks or nacks, logging failures. Returns whether the broker accepted it.
async fn settle(broker: &dyn Broker, envelope: &Envelope, how: Settle) -> bool {
    let result = match how {
        Settle::Ack => broker.ack(envelope).await,
        Settle::Nack { requeue } => broker.nack(envelope, requeue).await,
    };
    match result {
        Ok(()) => true,
        Err(e @ BrokerError::AlreadySettled { .. }) => {
            error!(delivery_tag = envelope.delivery_tag(), error = %e, "Envelope settled twice");
            false
        }
        Err(e) => {
            // The broker redelivers unsettled messages once the channel closes.
            warn!(
                delivery_tag = envelope.delivery_tag(),
                settle = ?how,
                error = %e,
                "Failed to settle message"
            );
            false
        }
    }
}

fn finish(
    request_id: Option<uuid::Uuid>,
    delivery_tag: u64,
    kind: OutcomeKind,
    modalities: BTreeMap<Modality, ModalityStatus>,
    publish_attempts: u32,
    settled: bool,
    start: Instant,
) -> TaskOutcome {
    let duration = start.elapsed();
    metrics::TASK_OUTCOMES
        .with_label_values(&[kind.as_str()])
        .inc();
    metrics::TASK_DURATION
        .with_label_values(&[kind.as_str()])
        .observe(duration.as_secs_f64());

    TaskOutcome {
        request_id,
        delivery_tag,
        kind,
        modalities,
        publish_attempts,
        settled,
        duration,
    }
}
