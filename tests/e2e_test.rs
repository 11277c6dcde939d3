//! End-to-end tests for the Secret Gateway binary
//!
//! These tests start the gateway process and verify the endpoints work correctly.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

/// Base port for tests, incremented atomically to avoid conflicts
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19400);

/// Get a unique port for testing
fn get_unique_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Create a temporary config file with the specified port.
/// The backend points at a port nothing listens on.
fn create_test_config(port: u16) -> tempfile::NamedTempFile {
    let config = format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[backend]
url = "http://127.0.0.1:1"

[metrics]
enabled = true
path = "/metrics"

[health]
enabled = true
path = "/health"
"#,
        port
    );

    let file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    std::fs::write(file.path(), config).unwrap();
    file
}

/// Start the gateway server
fn start_server(config_path: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_secret-gateway"))
        .args(["start", "-c", config_path])
        .env_remove("PORT")
        .env_remove("HOST")
        .env_remove("API_BACKEND_URL")
        .spawn()
        .expect("Failed to start gateway server")
}

/// Wait for the server to be ready by polling the health endpoint
fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    while start.elapsed() < timeout {
        if let Ok(response) = client.get(format!("http://127.0.0.1:{}/health", port)).send() {
            if response.status().is_success() {
                return true;
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn test_health_endpoint() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_number());

    server.kill().ok();
}

#[test]
fn test_relay_missing_url_returns_400() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/server/?service=Sonarr", port))
        .send()
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().unwrap();
    assert!(body["error"].is_string());

    server.kill().ok();
}

#[test]
fn test_relay_unreachable_backend_returns_502() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/server", port))
        .query(&[("service", "Sonarr"), ("url", "http://sonarr.lan/api")])
        .send()
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 502);
    let body: serde_json::Value = response.json().unwrap();
    assert!(body["error"].is_string());
    assert!(body["details"].is_string());

    // The failed call shows up in the metrics
    let metrics = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .expect("Failed to send request")
        .text()
        .unwrap();
    assert!(metrics.contains("outcome=\"gateway_error\""));

    server.kill().ok();
}

#[test]
fn test_port_env_overrides_config() {
    let config_port = get_unique_port();
    let env_port = get_unique_port();
    let config_file = create_test_config(config_port);

    let mut server = Command::new(env!("CARGO_BIN_EXE_secret-gateway"))
        .args(["start", "-c", config_file.path().to_str().unwrap()])
        .env("PORT", env_port.to_string())
        .spawn()
        .expect("Failed to start gateway server");

    assert!(
        wait_for_server(env_port, 10),
        "Server did not listen on the PORT override"
    );

    server.kill().ok();
}

#[test]
fn test_classify_command() {
    let dashboard = r#"
[[items]]
name = "Pi-hole"
url = "http://pihole.lan/admin/"

[[items]]
name = "Sonarr"
type = "Sonarr"
url = "http://sonarr.lan"
headers = { X-Api-Key = "secret://sonarr:apikey" }
"#;
    let file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    std::fs::write(file.path(), dashboard).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_secret-gateway"))
        .args(["classify", "-d", file.path().to_str().unwrap()])
        .output()
        .expect("Failed to run classify");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Pi-hole → direct (http://pihole.lan/admin)"));
    assert!(stdout.contains("Sonarr → gateway (http://sonarr.lan)"));
}
