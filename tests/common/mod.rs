//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure: config fixtures, a
//! throwaway asset/model directory layout and a mock backend that speaks
//! the health/load HTTP contract.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Command for the modelport binary with the caller's config variables removed
pub fn modelport_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("modelport").unwrap();
    for (key, _) in std::env::vars() {
        if key.starts_with("MODELPORT_") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Test Environment
// ─────────────────────────────────────────────────────────────────

/// Temporary asset, model and log directories plus a config pointing at them
pub struct TestEnvironment {
    pub root: TempDir,
    pub config_path: PathBuf,
    pub asset_dir: PathBuf,
    pub model_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp directory");
        let root_path = root.path();

        let asset_dir = root_path.join("assets");
        let model_dir = root_path.join("models");
        let log_dir = root_path.join("logs");
        let config_path = root_path.join("config.toml");

        fs::create_dir_all(asset_dir.join("backend-assets").join("grpc")).expect("Failed to create asset dir");
        fs::create_dir_all(&model_dir).expect("Failed to create model dir");
        fs::create_dir_all(&log_dir).expect("Failed to create log dir");

        let config = format!(
            r#"
[loader]
asset_dir = "{}"
threads = 2
grpc_attempts = 3
grpc_attempt_delay_secs = 0
request_timeout_secs = 10

[storage]
model_dir = "{}"

[logging]
level = "debug"
file = "{}"
max_files = 2
"#,
            asset_dir.display(),
            model_dir.display(),
            log_dir.join("modelport.log").display(),
        );
        fs::write(&config_path, config).expect("Failed to write config");

        Self {
            root,
            config_path,
            asset_dir,
            model_dir,
            log_dir,
        }
    }

    /// Get the config path as a string
    pub fn config(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    /// Drop a fake executable into backend-assets/grpc
    pub fn install_backend(&self, name: &str) -> PathBuf {
        let path = self.asset_dir.join("backend-assets").join("grpc").join(name);
        fs::write(&path, "#!/bin/sh\nexit 1\n").expect("Failed to write backend");
        path
    }

    /// Create a directory inside backend-assets/grpc
    pub fn install_dir(&self, name: &str) {
        fs::create_dir_all(self.asset_dir.join("backend-assets").join("grpc").join(name))
            .expect("Failed to create directory");
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────

/// How the mock backend answers
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Healthy, accepts every load
    Ready,
    /// Health checks answer 503
    NeverReady,
    /// Healthy, rejects loads with this message
    Rejects(String),
}

/// A request the mock backend received
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// HTTP server implementing `GET /health` and `POST /load`
pub struct MockBackend {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    received: Arc<RwLock<Vec<Received>>>,
}

impl MockBackend {
    /// Start a mock backend on an ephemeral loopback port
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let received = Arc::new(RwLock::new(Vec::new()));
        let received_clone = received.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            let received = received_clone.clone();
                            let behavior = behavior.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, behavior, received).await;
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            received,
        }
    }

    /// `host:port` the backend listens on
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.read().clone()
    }

    pub fn load_requests(&self) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| r.path == "/load")
            .collect()
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

async fn handle_connection(mut stream: TcpStream, behavior: Behavior, received: Arc<RwLock<Vec<Received>>>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };

    let (status, body) = match (request.method.as_str(), request.path.as_str(), &behavior) {
        ("GET", "/health", Behavior::NeverReady) => ("503 Service Unavailable", r#"{"alive":false}"#.to_string()),
        ("GET", "/health", _) => ("200 OK", r#"{"alive":true}"#.to_string()),
        ("POST", "/load", Behavior::Rejects(message)) => (
            "200 OK",
            serde_json::json!({ "success": false, "message": message }).to_string(),
        ),
        ("POST", "/load", _) => ("200 OK", r#"{"success":true,"message":"loaded"}"#.to_string()),
        _ => ("404 Not Found", String::new()),
    };

    received.write().push(request);

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<Received> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();
    Some(Received { method, path, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_dir_exists() {
        assert!(fixtures_dir().exists(), "Fixtures directory should exist");
    }

    #[test]
    fn test_valid_config_exists() {
        assert!(
            valid_config_fixture().exists(),
            "Valid config fixture should exist"
        );
    }

    #[test]
    fn test_invalid_config_exists() {
        assert!(
            invalid_config_fixture().exists(),
            "Invalid config fixture should exist"
        );
    }
}
