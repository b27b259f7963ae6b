//! Mock backend client for testing
//!
//! Scripted stand-ins for [`BackendClient`] and [`ClientFactory`] so the
//! loader can be exercised without real backend processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::{BackendClient, ClientFactory, LoadModelOptions, LoadModelResult, ModelAddress, SharedClient};

// ─────────────────────────────────────────────────────────────────
// Mock Configuration
// ─────────────────────────────────────────────────────────────────

/// Outcome of a scripted health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Alive,
    NotReady,
    Unreachable,
}

/// Configuration for mock client behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Probe results returned in order before falling back to `default_probe`
    pub probes: Vec<Probe>,

    /// Result once the script is exhausted
    pub default_probe: Probe,

    /// Whether the load call fails at the transport level
    pub fail_load_transport: bool,

    /// Answer to the load call
    pub load_result: LoadModelResult,

    /// Token cancelled when the load call arrives
    pub cancel_on_load: Option<CancellationToken>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            probes: Vec::new(),
            default_probe: Probe::Alive,
            fail_load_transport: false,
            load_result: LoadModelResult {
                success: true,
                message: String::new(),
            },
            cancel_on_load: None,
        }
    }
}

impl MockConfig {
    pub fn never_ready() -> Self {
        Self {
            default_probe: Probe::NotReady,
            ..Default::default()
        }
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            load_result: LoadModelResult {
                success: false,
                message: message.to_string(),
            },
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Shared Endpoint State
// ─────────────────────────────────────────────────────────────────

/// State of one scripted endpoint, shared by every handle to it
#[derive(Debug)]
pub struct MockEndpoint {
    config: MockConfig,
    probes: Mutex<VecDeque<Probe>>,
    health_calls: AtomicU32,
    loads: Mutex<Vec<LoadModelOptions>>,
}

impl MockEndpoint {
    fn new(config: MockConfig) -> Self {
        Self {
            probes: Mutex::new(config.probes.iter().copied().collect()),
            config,
            health_calls: AtomicU32::new(0),
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn health_calls(&self) -> u32 {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> Vec<LoadModelOptions> {
        self.loads.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Client
// ─────────────────────────────────────────────────────────────────

/// Mock implementation of BackendClient
#[derive(Debug)]
pub struct MockBackendClient {
    address: ModelAddress,
    endpoint: Arc<MockEndpoint>,
}

#[async_trait]
impl BackendClient for MockBackendClient {
    fn address(&self) -> &ModelAddress {
        &self.address
    }

    async fn health_check(&self) -> Result<bool> {
        self.endpoint.health_calls.fetch_add(1, Ordering::SeqCst);
        let probe = self
            .endpoint
            .probes
            .lock()
            .pop_front()
            .unwrap_or(self.endpoint.config.default_probe);

        match probe {
            Probe::Alive => Ok(true),
            Probe::NotReady => Ok(false),
            Probe::Unreachable => Err(Error::Internal(format!("connection refused: {}", self.address))),
        }
    }

    async fn load_model(&self, options: &LoadModelOptions) -> Result<LoadModelResult> {
        self.endpoint.loads.lock().push(options.clone());
        if let Some(token) = &self.endpoint.config.cancel_on_load {
            token.cancel();
        }
        if self.endpoint.config.fail_load_transport {
            return Err(Error::Internal(format!("transport closed: {}", self.address)));
        }
        Ok(self.endpoint.config.load_result.clone())
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Factory
// ─────────────────────────────────────────────────────────────────

/// Factory handing out mock clients
///
/// Addresses registered with [`MockClientFactory::script`] get their own
/// behavior; every other address shares the default endpoint.
pub struct MockClientFactory {
    default: Arc<MockEndpoint>,
    scripted: Mutex<HashMap<String, Arc<MockEndpoint>>>,
    connects: Mutex<Vec<ModelAddress>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            default: Arc::new(MockEndpoint::new(config)),
            scripted: Mutex::new(HashMap::new()),
            connects: Mutex::new(Vec::new()),
        }
    }

    /// Give `address` its own scripted behavior
    pub fn script(&self, address: &str, config: MockConfig) -> Arc<MockEndpoint> {
        let endpoint = Arc::new(MockEndpoint::new(config));
        self.scripted.lock().insert(address.to_string(), endpoint.clone());
        endpoint
    }

    pub fn default_endpoint(&self) -> Arc<MockEndpoint> {
        self.default.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn connected(&self) -> Vec<ModelAddress> {
        self.connects.lock().clone()
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for MockClientFactory {
    fn connect(&self, address: &ModelAddress) -> Result<SharedClient> {
        self.connects.lock().push(address.clone());
        let endpoint = self
            .scripted
            .lock()
            .get(address.as_str())
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        Ok(Arc::new(MockBackendClient {
            address: address.clone(),
            endpoint,
        }))
    }
}
