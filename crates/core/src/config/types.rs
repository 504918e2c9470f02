use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Message broker connection and queue names
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_user")]
    pub user: String,
    #[serde(default = "default_broker_password")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Queue that prediction requests are read from.
    #[serde(default = "default_queue_in")]
    pub queue_in: String,
    /// Queue that prediction results are written to.
    #[serde(default = "default_queue_out")]
    pub queue_out: String,
    /// Connection attempt timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            user: default_broker_user(),
            password: default_broker_password(),
            vhost: default_vhost(),
            queue_in: default_queue_in(),
            queue_out: default_queue_out(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl BrokerConfig {
    /// AMQP URI with credentials and vhost percent-encoded.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            urlencoding::encode(&self.vhost),
        )
    }
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_broker_user() -> String {
    "guest".to_string()
}

fn default_broker_password() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_queue_in() -> String {
    "my-predictions".to_string()
}

fn default_queue_out() -> String {
    "my-predictions-anws".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

/// Worker pool and task processing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of messages processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory holding per-request local artifacts.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Leave fetched artifacts on disk after prediction.
    #[serde(default)]
    pub keep_artifacts: bool,

    /// How long in-flight tasks may drain after shutdown is requested.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Backoff for publishing results. `max_attempts` counts every attempt.
    #[serde(default = "RetryConfig::publish_default")]
    pub publish_retry: RetryConfig,

    /// Backoff between reconnect attempts. `max_attempts = 0` retries forever.
    #[serde(default = "RetryConfig::reconnect_default")]
    pub reconnect: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            scratch_dir: default_scratch_dir(),
            keep_artifacts: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
            publish_retry: RetryConfig::publish_default(),
            reconnect: RetryConfig::reconnect_default(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("aiep-worker")
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn publish_default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }

    pub fn reconnect_default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Remote file retrieval configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    pub backend: FetcherBackend,
    /// FTP settings (required when backend = "ftp")
    #[serde(default)]
    pub ftp: Option<FtpConfig>,
    /// Local directory settings (required when backend = "local")
    #[serde(default)]
    pub local: Option<LocalFetcherConfig>,
}

/// Available fetch backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetcherBackend {
    Ftp,
    Local,
}

/// FTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default = "default_ftp_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Upper bound for one complete transfer, in seconds.
    #[serde(default = "default_ftp_timeout")]
    pub timeout_secs: u64,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_user() -> String {
    "anonymous".to_string()
}

fn default_ftp_timeout() -> u64 {
    120
}

/// Local directory fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalFetcherConfig {
    /// Remote paths are resolved below this directory.
    pub root: PathBuf,
}

/// Predictor configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PredictorConfig {
    #[serde(default)]
    pub eeg: EegConfig,
}

/// EEG window detector settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EegConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u32,
    /// A window is flagged when its line length exceeds `threshold` times the median.
    #[serde(default = "default_eeg_threshold")]
    pub threshold: f64,
}

impl Default for EegConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            threshold: default_eeg_threshold(),
        }
    }
}

fn default_window_secs() -> u32 {
    5
}

fn default_eeg_threshold() -> f64 {
    3.0
}

/// Health/metrics HTTP endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: IpAddr,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_metrics_port() -> u16 {
    9464
}

/// Sanitized config for logs and API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub broker: SanitizedBrokerConfig,
    pub worker: WorkerConfig,
    pub fetcher: SanitizedFetcherConfig,
    pub predictor: PredictorConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password_configured: bool,
    pub vhost: String,
    pub queue_in: String,
    pub queue_out: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedFetcherConfig {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ftp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            broker: SanitizedBrokerConfig {
                host: config.broker.host.clone(),
                port: config.broker.port,
                user: config.broker.user.clone(),
                password_configured: !config.broker.password.is_empty(),
                vhost: config.broker.vhost.clone(),
                queue_in: config.broker.queue_in.clone(),
                queue_out: config.broker.queue_out.clone(),
            },
            worker: config.worker.clone(),
            fetcher: SanitizedFetcherConfig {
                backend: match config.fetcher.backend {
                    FetcherBackend::Ftp => "ftp".to_string(),
                    FetcherBackend::Local => "local".to_string(),
                },
                ftp_host: config
                    .fetcher
                    .ftp
                    .as_ref()
                    .map(|f| format!("{}:{}", f.host, f.port)),
                local_root: config.fetcher.local.as_ref().map(|l| l.root.clone()),
            },
            predictor: config.predictor.clone(),
            metrics: config.metrics.clone(),
        }
    }
}
