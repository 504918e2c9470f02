use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment prefix for configuration overrides (`AIEP_BROKER__HOST`, ...)
const ENV_PREFIX: &str = "AIEP_";

/// Load configuration from an optional file with environment variable overrides.
///
/// Precedence, lowest first: TOML file, `AIEP_`-prefixed variables (nested with
/// `__`), then the legacy `RABBITMQ_DEFAULT_*` variables.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut figment = Figment::new();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        figment = figment.merge(Toml::file(path));
    }

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(legacy_broker_env())
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// The variable names used by existing RabbitMQ deployments.
fn legacy_broker_env() -> Env {
    Env::raw().filter_map(|key| {
        let mapped = match key.as_str() {
            k if k.eq_ignore_ascii_case("RABBITMQ_DEFAULT_HOST") => "broker.host",
            k if k.eq_ignore_ascii_case("RABBITMQ_DEFAULT_USER") => "broker.user",
            k if k.eq_ignore_ascii_case("RABBITMQ_DEFAULT_PASS") => "broker.password",
            _ => return None,
        };
        Some(mapped.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LOCAL_FETCHER: &str = r#"
[fetcher]
backend = "local"

[fetcher.local]
root = "/srv/exams"
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = format!(
            r#"
[broker]
host = "rabbit"

[worker]
concurrency = 4
{}"#,
            LOCAL_FETCHER
        );
        let config = load_config_from_str(&toml).unwrap();
        assert_eq!(config.broker.host, "rabbit");
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_load_config_from_str_missing_fetcher() {
        let toml = r#"
[broker]
host = "rabbit"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[broker]
host = "10.0.0.5"
queue_in = "requests"
queue_out = "responses"
{}"#,
            LOCAL_FETCHER
        )
        .unwrap();

        let config = load_config(Some(temp_file.path())).unwrap();
        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.queue_in, "requests");
        assert_eq!(config.broker.queue_out, "responses");
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("worker.toml", LOCAL_FETCHER)?;
            jail.set_env("AIEP_BROKER__HOST", "rabbit.prod");
            jail.set_env("AIEP_BROKER__QUEUE_IN", "incoming");
            jail.set_env("AIEP_WORKER__CONCURRENCY", "3");

            let config = load_config(Some(Path::new("worker.toml"))).unwrap();
            assert_eq!(config.broker.host, "rabbit.prod");
            assert_eq!(config.broker.queue_in, "incoming");
            assert_eq!(config.worker.concurrency, 3);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_rabbitmq_variables() {
        Jail::expect_with(|jail| {
            jail.set_env("AIEP_FETCHER__BACKEND", "local");
            jail.set_env("AIEP_FETCHER__LOCAL__ROOT", "/srv/exams");
            jail.set_env("RABBITMQ_DEFAULT_HOST", "rabbitmq");
            jail.set_env("RABBITMQ_DEFAULT_USER", "worker");
            jail.set_env("RABBITMQ_DEFAULT_PASS", "s3cret");

            let config = load_config(None).unwrap();
            assert_eq!(config.broker.host, "rabbitmq");
            assert_eq!(config.broker.user, "worker");
            assert_eq!(config.broker.password, "s3cret");
            Ok(())
        });
    }
}
