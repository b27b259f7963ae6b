//! Remote call interface to backend processes
//!
//! Every backend, spawned or external, speaks a small HTTP/JSON contract:
//!
//! - `GET  {base}/health` answers 2xx while the service is alive
//! - `POST {base}/load`   takes [`LoadModelOptions`] and answers [`LoadModelResult`]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Model Address
// ─────────────────────────────────────────────────────────────────

/// Endpoint of a running backend instance
///
/// Either `127.0.0.1:<port>` for a spawned process or whatever endpoint an
/// external backend was declared with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelAddress(String);

impl ModelAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn loopback(port: u16) -> Self {
        Self(format!("127.0.0.1:{}", port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base URL for remote calls; bare `host:port` addresses get `http://`
    pub fn base_url(&self) -> Result<Url> {
        let raw = if self.0.contains("://") {
            self.0.clone()
        } else {
            format!("http://{}", self.0)
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid backend address '{}': {}", self.0, e)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

impl fmt::Display for ModelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────

/// Options sent with the remote load call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModelOptions {
    /// Model name as requested by the caller
    pub model: String,

    /// Model file the backend should open
    pub model_file: String,

    /// Directory models live in
    pub model_path: String,

    /// Extra directory for shared libraries the backend needs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_search_path: Option<String>,

    /// Inference threads (0 = let the backend decide)
    pub threads: u32,

    /// Context size in tokens
    pub context_size: u32,

    /// Layers to offload to GPU
    pub n_gpu_layers: u32,

    pub f16: bool,

    pub mmap: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Answer to the remote load call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadModelResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    alive: bool,
}

// ─────────────────────────────────────────────────────────────────
// BackendClient Trait
// ─────────────────────────────────────────────────────────────────

/// Handle for remote calls to one backend instance
#[async_trait]
pub trait BackendClient: Send + Sync + fmt::Debug {
    /// Endpoint this handle talks to
    fn address(&self) -> &ModelAddress;

    /// Liveness probe. `Ok(false)` means the service answered but is not ready.
    async fn health_check(&self) -> Result<bool>;

    /// Ask the backend to load a model
    async fn load_model(&self, options: &LoadModelOptions) -> Result<LoadModelResult>;
}

/// Type alias for a shared client handle
pub type SharedClient = Arc<dyn BackendClient>;

/// Builds client handles bound to an address
pub trait ClientFactory: Send + Sync {
    fn connect(&self, address: &ModelAddress) -> Result<SharedClient>;
}

// ─────────────────────────────────────────────────────────────────
// HTTP Implementation
// ─────────────────────────────────────────────────────────────────

/// HTTP/JSON client for a backend endpoint
#[derive(Debug)]
pub struct HttpBackendClient {
    address: ModelAddress,
    http: Client,
    health_url: Url,
    load_url: Url,
    health_timeout: Duration,
}

impl HttpBackendClient {
    pub fn new(address: ModelAddress, request_timeout: Duration, health_timeout: Duration) -> Result<Self> {
        let base = address.base_url()?;
        let health_url = base
            .join("health")
            .map_err(|e| Error::Internal(format!("Failed to build health URL: {}", e)))?;
        let load_url = base
            .join("load")
            .map_err(|e| Error::Internal(format!("Failed to build load URL: {}", e)))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(health_timeout)
            .build()?;

        Ok(Self {
            address,
            http,
            health_url,
            load_url,
            health_timeout,
        })
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn address(&self) -> &ModelAddress {
        &self.address
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .http
            .get(self.health_url.clone())
            .timeout(self.health_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(address = %self.address, status = %response.status(), "Health check answered not ready");
            return Ok(false);
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<HealthResponse>(&body) {
            Ok(health) => Ok(health.alive),
            // Any 2xx without a structured body counts as alive
            Err(_) => Ok(true),
        }
    }

    async fn load_model(&self, options: &LoadModelOptions) -> Result<LoadModelResult> {
        let response = self
            .http
            .post(self.load_url.clone())
            .json(options)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        match serde_json::from_slice::<LoadModelResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) if status.is_success() => Ok(LoadModelResult {
                success: true,
                message: String::new(),
            }),
            Err(_) => Ok(LoadModelResult {
                success: false,
                message: format!("HTTP {}: {}", status, String::from_utf8_lossy(&body).trim()),
            }),
        }
    }
}

/// Factory producing [`HttpBackendClient`]s
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            health_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, address: &ModelAddress) -> Result<SharedClient> {
        let client = HttpBackendClient::new(address.clone(), self.request_timeout, self.health_timeout)?;
        Ok(Arc::new(client))
    }
}
