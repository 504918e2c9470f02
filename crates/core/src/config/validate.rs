use super::{
    types::{Config, FetcherBackend},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Broker host and queue names are set, and the two queues differ
/// - Worker concurrency and publish attempts are at least 1
/// - The section for the selected fetcher backend is present
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let broker = &config.broker;
    if broker.host.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "broker.host cannot be empty".to_string(),
        ));
    }
    if broker.queue_in.is_empty() || broker.queue_out.is_empty() {
        return Err(ConfigError::ValidationError(
            "broker.queue_in and broker.queue_out must be set".to_string(),
        ));
    }
    if broker.queue_in == broker.queue_out {
        return Err(ConfigError::ValidationError(format!(
            "broker.queue_in and broker.queue_out must differ (both are {:?})",
            broker.queue_in
        )));
    }

    if config.worker.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "worker.concurrency must be at least 1".to_string(),
        ));
    }
    if config.worker.publish_retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "worker.publish_retry.max_attempts must be at least 1".to_string(),
        ));
    }

    match config.fetcher.backend {
        FetcherBackend::Ftp if config.fetcher.ftp.is_none() => {
            return Err(ConfigError::ValidationError(
                "fetcher.backend = \"ftp\" requires a [fetcher.ftp] section".to_string(),
            ));
        }
        FetcherBackend::Local if config.fetcher.local.is_none() => {
            return Err(ConfigError::ValidationError(
                "fetcher.backend = \"local\" requires a [fetcher.local] section".to_string(),
            ));
        }
        _ => {}
    }

    if config.predictor.eeg.window_secs == 0 {
        return Err(ConfigError::ValidationError(
            "predictor.eeg.window_secs must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[fetcher]
backend = "local"

[fetcher.local]
root = "/srv/exams"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_same_queue_fails() {
        let mut config = base_config();
        config.broker.queue_out = config.broker.queue_in.clone();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = base_config();
        config.worker.concurrency = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_zero_publish_attempts_fails() {
        let mut config = base_config();
        config.worker.publish_retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_missing_backend_section_fails() {
        let mut config = base_config();
        config.fetcher.backend = FetcherBackend::Ftp;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("[fetcher.ftp]"));
    }
}
