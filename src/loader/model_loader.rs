//! Model loading entry points
//!
//! [`ModelLoader::backend_loader`] loads a model with one named backend.
//! [`ModelLoader::greedy_loader`] walks every installed and external backend
//! until one of them accepts the model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{
    list_backends, resolve_alias, select_cpu_variants, ClientFactory, CpuFeatures, KnownBackend,
    SharedClient,
};
use crate::error::{BackendFailure, Error, ErrorCode, Result};

use super::cache::ClientCache;
use super::launcher::ProcessLauncher;
use super::options::{ExternalBackends, LoadOptions};
use super::registry::ModelRegistry;

pub struct ModelLoader {
    registry: Arc<ModelRegistry>,
    launcher: ProcessLauncher,
    clients: ClientCache,
    factory: Arc<dyn ClientFactory>,
    eviction_lock: Mutex<()>,
    cpu_features: Option<CpuFeatures>,
}

impl ModelLoader {
    pub fn new(model_path: impl Into<PathBuf>, factory: Arc<dyn ClientFactory>) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let launcher = ProcessLauncher::new(model_path, registry.clone(), factory.clone());

        Self {
            registry,
            launcher,
            clients: ClientCache::new(),
            factory,
            eviction_lock: Mutex::new(()),
            cpu_features: None,
        }
    }

    /// Use fixed CPU features instead of detecting them on each greedy load
    #[cfg(test)]
    pub fn with_cpu_features(mut self, features: CpuFeatures) -> Self {
        self.cpu_features = Some(features);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Load `options.model()` with the backend named in `options.backend()`
    pub async fn backend_loader(&self, options: &LoadOptions) -> Result<SharedClient> {
        if options.backend().trim().is_empty() {
            return Err(Error::config_field_invalid("backend", "A backend name is required"));
        }

        let backend = resolve_alias(&options.backend().to_lowercase());
        let model = options.model();
        info!(backend = %backend, model = %model, "Loading model with backend");

        if options.single_active_backend() {
            let _guard = self.eviction_lock.lock().await;
            self.registry
                .stop_all_except(model)
                .await
                .map_err(|e| e.in_stage("stopping other backends"))?;
        }

        let (backend, options) = self.apply_backend_overrides(&backend, options);

        let address = self
            .registry
            .load_or_reuse(model, || self.launcher.launch(&backend, &options))
            .await
            .map_err(|e| e.in_stage(format!("loading '{}' with backend '{}'", model, backend)))?;

        self.clients
            .resolve(&address, options.isolation(), self.factory.as_ref())
            .map_err(|e| e.in_stage(format!("connecting to backend at {}", address)))
    }

    /// Load `options.model()` with the first backend that accepts it
    pub async fn greedy_loader(&self, options: &LoadOptions) -> Result<SharedClient> {
        let model = options.model();

        if let Some(address) = self.registry.check_is_loaded(model) {
            debug!(model = %model, address = %address, "Model already loaded");
            return self.clients.resolve(&address, options.isolation(), self.factory.as_ref());
        }

        if options.single_active_backend() {
            let _guard = self.eviction_lock.lock().await;
            if let Err(e) = self.registry.stop_all_except(model).await {
                warn!(model = %model, error = %e, "Failed to stop other backends, loading anyway");
            }
        }

        let candidates = self.candidates(options)?;
        info!(model = %model, candidates = ?candidates, "Loading model greedily");

        let mut failures = Vec::new();
        for candidate in &candidates {
            match self.backend_loader(&options.with_backend(candidate.as_str())).await {
                Ok(client) => {
                    info!(model = %model, backend = %candidate, "Loaded model");
                    return Ok(client);
                }
                Err(e) => {
                    let cancelled = e.code() == ErrorCode::Cancelled;
                    warn!(model = %model, backend = %candidate, error = %e, "Backend failed to load model");
                    failures.push(BackendFailure::new(candidate.as_str(), &e));
                    if cancelled {
                        break;
                    }
                }
            }
        }

        Err(Error::AllBackendsFailed {
            model: model.to_string(),
            failures,
        })
    }

    /// Greedy candidate order for `options`
    pub fn candidates(&self, options: &LoadOptions) -> Result<Vec<String>> {
        let features = self.cpu_features.unwrap_or_else(CpuFeatures::detect);
        greedy_candidates(options.asset_dir(), options.external_backends(), features)
    }

    /// Stop every backend this loader started
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.eviction_lock.lock().await;
        self.registry.stop_all().await
    }

    fn apply_backend_overrides(&self, backend: &str, options: &LoadOptions) -> (String, LoadOptions) {
        let assets = options.asset_dir().join("backend-assets");
        match KnownBackend::from_name(backend) {
            Some(known) if known.is_gpt4all_family() => (
                KnownBackend::Gpt4All.name().to_string(),
                options.with_library_search_path(&assets.join("gpt4all")),
            ),
            Some(KnownBackend::Piper) => (
                backend.to_string(),
                options.with_library_search_path(&assets.join("espeak-ng-data")),
            ),
            _ => (backend.to_string(), options.clone()),
        }
    }
}

/// Discovered backends followed by external ones, with the CPU variant applied
pub fn greedy_candidates(
    asset_dir: &Path,
    external_backends: &ExternalBackends,
    features: CpuFeatures,
) -> Result<Vec<String>> {
    let mut candidates = list_backends(asset_dir).map_err(|e| e.in_stage("discovering backends"))?;
    candidates.extend(external_backends.names().map(str::to_string));
    select_cpu_variants(&mut candidates, features);
    Ok(candidates)
}
