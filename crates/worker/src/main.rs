mod api;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aiep_core::{
    create_fetcher, load_config, validate_config, AmqpConnector, Config, ConsumerConfig,
    ConsumptionLoop, PredictorRegistry, ProcessorConfig, SanitizedConfig, TaskProcessor,
};

use api::create_router;
use state::AppState;

/// Default config file, used only when present.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();

    let config_path = config_path();
    match &config_path {
        Some(path) => info!("Loading configuration from {:?}", path),
        None => info!("No config file, using defaults and environment"),
    }
    let config = load_config(config_path.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    info!(
        config = %serde_json::to_string(&sanitized).unwrap_or_default(),
        "Configuration loaded"
    );

    let fetcher = create_fetcher(&config.fetcher).context("Failed to create fetcher")?;
    info!(backend = ?config.fetcher.backend, "Fetcher initialized");

    let predictors = PredictorRegistry::with_defaults(&config.predictor);
    info!(modalities = ?predictors.modalities(), "Predictors registered");

    let processor = Arc::new(TaskProcessor::new(
        ProcessorConfig::from_config(&config),
        fetcher,
        predictors,
    ));

    let prefetch = u16::try_from(config.worker.concurrency).unwrap_or(u16::MAX);
    let connector = Arc::new(AmqpConnector::new(config.broker.clone(), prefetch));

    let consumer = Arc::new(ConsumptionLoop::new(
        ConsumerConfig::from_config(&config),
        connector,
        processor,
    ));

    let http = if config.metrics.enabled {
        Some(start_http_server(&config, Arc::clone(&consumer)).await?)
    } else {
        info!("Metrics endpoint disabled in config");
        None
    };

    let mut consumer_handle = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run().await }
    });

    let joined = tokio::select! {
        joined = &mut consumer_handle => joined,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining in-flight tasks");
            consumer.shutdown();
            consumer_handle.await
        }
    };

    if let Some(http) = http {
        http.stop().await;
    }

    joined
        .context("Consumption loop task panicked")?
        .context("Consumption loop failed")?;

    info!("Worker stopped");
    Ok(())
}

/// Installs the global subscriber; `AIEP_LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("AIEP_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// `AIEP_CONFIG` if set, else `config.toml` when it exists.
fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AIEP_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    default.exists().then_some(default)
}

/// Health/metrics server running beside the consumption loop.
struct HttpServer {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl HttpServer {
    async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "HTTP server task failed");
        }
    }
}

async fn start_http_server(config: &Config, consumer: Arc<ConsumptionLoop>) -> Result<HttpServer> {
    let state = Arc::new(AppState::new(config.clone(), consumer));
    let app = create_router(state);

    let addr = SocketAddr::new(config.metrics.host, config.metrics.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Serving /health, /metrics and /config on {}", addr);

    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "HTTP server error");
        }
    });

    Ok(HttpServer { stop_tx, handle })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
