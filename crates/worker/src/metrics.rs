//! Prometheus metrics for the worker process.
//!
//! The registry carries the core task/broker metrics plus the HTTP metrics of
//! the health endpoint. Consumer state gauges are refreshed from
//! [`ConsumptionLoop::status`](aiep_core::ConsumptionLoop::status) on scrape.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "aiep_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("aiep_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

// =============================================================================
// Consumer State (collected on scrape)
// =============================================================================

/// 1 while the consumption loop is running.
pub static CONSUMER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "aiep_consumer_running",
        "Whether the consumption loop is running (1) or not (0)",
    )
    .unwrap()
});

/// 1 while a broker session is consuming.
pub static CONSUMER_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "aiep_consumer_connected",
        "Whether a broker session is consuming (1) or not (0)",
    )
    .unwrap()
});

/// Configured worker slots.
pub static CONSUMER_CONCURRENCY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("aiep_consumer_concurrency", "Configured worker slots").unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();

    registry
        .register(Box::new(CONSUMER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(CONSUMER_CONNECTED.clone()))
        .unwrap();
    registry
        .register(Box::new(CONSUMER_CONCURRENCY.clone()))
        .unwrap();

    for metric in aiep_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Refresh gauges that mirror consumer state.
pub fn collect_dynamic_metrics(state: &AppState) {
    let status = state.consumer().status();
    CONSUMER_RUNNING.set(i64::from(status.running));
    CONSUMER_CONNECTED.set(i64::from(status.connected));
    CONSUMER_CONCURRENCY.set(status.concurrency as i64);
}

/// Collapse unknown paths so scanners cannot blow up label cardinality.
pub fn normalize_path(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/config" => "/config",
        _ => "other",
    }
}
