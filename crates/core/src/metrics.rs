//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task processing (outcomes, per-modality results, stage durations)
//! - Broker transport (publish retries, reconnects)
//! - The consumption loop (in-flight tasks)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Task Processing
// =============================================================================

/// Messages received from the inbound queue.
pub static MESSAGES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "aiep_messages_received_total",
        "Total messages received from the inbound queue",
    )
    .unwrap()
});

/// Task outcomes by kind.
pub static TASK_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("aiep_task_outcomes_total", "Total tasks by final outcome"),
        &["outcome"], // "completed", "rejected", "requeued", "aborted"
    )
    .unwrap()
});

/// Task duration in seconds, from receipt to settlement.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("aiep_task_duration_seconds", "Duration of task processing")
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Per-modality results by status.
pub static MODALITY_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aiep_modality_results_total",
            "Total modality results by status",
        ),
        &["modality", "status"], // status: "ok", "fetch_failed", "predict_failed"
    )
    .unwrap()
});

/// Fetch and predict durations per modality.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "aiep_stage_duration_seconds",
            "Duration of fetch and predict stages",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["modality", "stage"],
    )
    .unwrap()
});

/// Fetch errors by kind.
pub static FETCH_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("aiep_fetch_errors_total", "Total fetch errors by kind"),
        &["kind"],
    )
    .unwrap()
});

/// Prediction errors by kind.
pub static PREDICTION_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aiep_prediction_errors_total",
            "Total prediction errors by kind",
        ),
        &["kind"],
    )
    .unwrap()
});

// =============================================================================
// Broker
// =============================================================================

/// Publish attempts that failed and were retried.
pub static PUBLISH_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "aiep_publish_retries_total",
        "Total publish attempts that were retried",
    )
    .unwrap()
});

/// Successful reconnects after a lost connection.
pub static RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("aiep_reconnects_total", "Total broker reconnects").unwrap()
});

// =============================================================================
// Consumption Loop
// =============================================================================

/// Tasks currently being processed.
pub static TASKS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("aiep_tasks_in_flight", "Number of tasks currently in flight").unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(TASK_OUTCOMES.clone()),
        Box::new(TASK_DURATION.clone()),
        Box::new(MODALITY_RESULTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(FETCH_ERRORS.clone()),
        Box::new(PREDICTION_ERRORS.clone()),
        Box::new(PUBLISH_RETRIES.clone()),
        Box::new(RECONNECTS.clone()),
        Box::new(TASKS_IN_FLIGHT.clone()),
    ]
}
