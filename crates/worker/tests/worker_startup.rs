//! Process-level tests: spawn the worker binary against an unreachable broker
//! and probe its startup behavior and health endpoint.

use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config pointing at a closed broker port with the metrics endpoint on `port`.
fn worker_config(port: u16, data_root: &std::path::Path) -> String {
    format!(
        r#"
[broker]
host = "127.0.0.1"
port = 1
password = "s3cret"
connect_timeout_secs = 1

[worker.reconnect]
max_attempts = 0
initial_delay_ms = 50
max_delay_ms = 200

[fetcher]
backend = "local"

[fetcher.local]
root = "{}"

[metrics]
enabled = true
host = "127.0.0.1"
port = {}
"#,
        data_root.display(),
        port
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn worker_command(config_path: &std::path::Path) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(env!("CARGO_BIN_EXE_aiep-worker"));
    command
        .env("AIEP_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .env_remove("RABBITMQ_DEFAULT_HOST")
        .env_remove("RABBITMQ_DEFAULT_USER")
        .env_remove("RABBITMQ_DEFAULT_PASS")
        .kill_on_drop(true);
    command
}

/// Wait for the health endpoint to answer at all
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_reports_degraded_without_broker() {
    let port = get_available_port();
    let data = TempDir::new().unwrap();
    let config = write_config(&worker_config(port, data.path()));

    let mut worker = worker_command(config.path()).spawn().unwrap();
    assert!(
        wait_for_server(port, 100).await,
        "Worker did not start in time"
    );

    // The HTTP server comes up just before the consumption loop starts.
    let client = Client::new();
    let mut json = serde_json::Value::Null;
    for _ in 0..100 {
        let response = client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        json = response.json().await.unwrap();
        if json["status"] == "degraded" {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["consumer"]["running"], true);
    assert_eq!(json["consumer"]["connected"], false);

    // Still retrying rather than exiting.
    assert!(worker.try_wait().unwrap().is_none());

    worker.kill().await.unwrap();
}

#[tokio::test]
async fn test_config_endpoint_redacts_secrets() {
    let port = get_available_port();
    let data = TempDir::new().unwrap();
    let config = write_config(&worker_config(port, data.path()));

    let mut worker = worker_command(config.path()).spawn().unwrap();
    assert!(
        wait_for_server(port, 100).await,
        "Worker did not start in time"
    );

    let body = Client::new()
        .get(format!("http://127.0.0.1:{}/config", port))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!body.contains("s3cret"));
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["broker"]["queue_in"], "my-predictions");
    assert_eq!(json["broker"]["queue_out"], "my-predictions-anws");
    assert_eq!(json["fetcher"]["backend"], "local");

    worker.kill().await.unwrap();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let data = TempDir::new().unwrap();
    let missing = data.path().join("nope.toml");

    let status = timeout(
        Duration::from_secs(10),
        worker_command(&missing).status(),
    )
    .await
    .expect("worker did not exit")
    .unwrap();

    assert!(!status.success());
}

#[tokio::test]
async fn test_invalid_config_exits_with_error() {
    let config = write_config(
        r#"
[broker]
queue_in = "same"
queue_out = "same"

[fetcher]
backend = "local"

[fetcher.local]
root = "/tmp"
"#,
    );

    let status = timeout(
        Duration::from_secs(10),
        worker_command(config.path()).status(),
    )
    .await
    .expect("worker did not exit")
    .unwrap();

    assert!(!status.success());
}
