//! Per-call load options
//!
//! [`LoadOptions`] is assembled once per load with [`LoadOptions::builder`]
//! and never mutated afterwards. The greedy loader derives one copy per
//! candidate with [`LoadOptions::with_backend`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backend::LoadModelOptions;
use crate::error::{Error, Result};

/// Default readiness probes before giving up on a backend
pub const DEFAULT_GRPC_ATTEMPTS: u32 = 20;

/// Default delay between readiness probes
pub const DEFAULT_GRPC_ATTEMPT_DELAY: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────
// Client Isolation
// ─────────────────────────────────────────────────────────────────

/// Whether client handles are shared across calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientIsolation {
    /// One memoized handle per address
    #[default]
    Shared,
    /// A fresh handle on every call
    PerCall,
}

impl ClientIsolation {
    pub fn is_per_call(&self) -> bool {
        matches!(self, ClientIsolation::PerCall)
    }
}

impl std::fmt::Display for ClientIsolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientIsolation::Shared => write!(f, "shared"),
            ClientIsolation::PerCall => write!(f, "per-call"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// External Backends
// ─────────────────────────────────────────────────────────────────

/// A backend declared outside the asset directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBackend {
    pub name: String,
    /// Executable path to spawn, or an endpoint that is already listening
    pub uri: String,
}

impl ExternalBackend {
    /// Parse `name:uri`, splitting on the first colon
    pub fn parse(entry: &str) -> Result<Self> {
        let (name, uri) = entry.split_once(':').ok_or_else(|| {
            Error::config_field_invalid(
                "external_backends",
                format!("'{}' is not of the form name:uri", entry),
            )
        })?;

        let name = name.trim();
        let uri = uri.trim();
        if name.is_empty() || uri.is_empty() {
            return Err(Error::config_field_invalid(
                "external_backends",
                format!("'{}' has an empty name or uri", entry),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            uri: uri.to_string(),
        })
    }
}

/// Externally declared backends in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalBackends {
    entries: Vec<ExternalBackend>,
}

impl ExternalBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a declaration. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, uri: impl Into<String>) {
        let name = name.into();
        let uri = uri.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.uri = uri,
            None => self.entries.push(ExternalBackend { name, uri }),
        }
    }

    /// Exact match first, then a case-insensitive one
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .or_else(|| self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name)))
            .map(|e| e.uri.as_str())
    }

    /// Declared names, in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalBackend> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a comma-separated list of `name:uri` entries
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut backends = Self::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parsed = ExternalBackend::parse(entry)?;
            backends.insert(parsed.name, parsed.uri);
        }
        Ok(backends)
    }
}

impl FromIterator<ExternalBackend> for ExternalBackends {
    fn from_iter<I: IntoIterator<Item = ExternalBackend>>(iter: I) -> Self {
        let mut backends = Self::new();
        for entry in iter {
            backends.insert(entry.name, entry.uri);
        }
        backends
    }
}

// ─────────────────────────────────────────────────────────────────
// Load Options
// ─────────────────────────────────────────────────────────────────

/// Immutable configuration for one load call
#[derive(Debug, Clone)]
pub struct LoadOptions {
    model: String,
    model_file: Option<String>,
    backend: String,
    asset_dir: PathBuf,
    external_backends: ExternalBackends,
    isolation: ClientIsolation,
    single_active_backend: bool,
    grpc_attempts: u32,
    grpc_attempt_delay: Duration,
    threads: u32,
    load_model_options: LoadModelOptions,
    cancel: CancellationToken,
    working_dir: Option<PathBuf>,
}

impl LoadOptions {
    pub fn builder() -> LoadOptionsBuilder {
        LoadOptionsBuilder::default()
    }

    /// Same options aimed at a different backend
    pub fn with_backend(&self, backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            ..self.clone()
        }
    }

    /// Same options with a library directory for the backend
    pub fn with_library_search_path(&self, dir: &Path) -> Self {
        let mut derived = self.clone();
        derived.load_model_options.library_search_path = Some(dir.display().to_string());
        derived
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_file(&self) -> Option<&str> {
        self.model_file.as_deref()
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    pub fn external_backends(&self) -> &ExternalBackends {
        &self.external_backends
    }

    pub fn isolation(&self) -> ClientIsolation {
        self.isolation
    }

    pub fn single_active_backend(&self) -> bool {
        self.single_active_backend
    }

    pub fn grpc_attempts(&self) -> u32 {
        self.grpc_attempts
    }

    pub fn grpc_attempt_delay(&self) -> Duration {
        self.grpc_attempt_delay
    }

    pub fn threads(&self) -> u32 {
        self.threads
    }

    pub fn load_model_options(&self) -> &LoadModelOptions {
        &self.load_model_options
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

/// Builder for [`LoadOptions`]
#[derive(Debug, Clone)]
pub struct LoadOptionsBuilder {
    model: String,
    model_file: Option<String>,
    backend: String,
    asset_dir: PathBuf,
    external_backends: ExternalBackends,
    isolation: ClientIsolation,
    single_active_backend: bool,
    grpc_attempts: u32,
    grpc_attempt_delay: Duration,
    threads: u32,
    load_model_options: LoadModelOptions,
    cancel: Option<CancellationToken>,
    working_dir: Option<PathBuf>,
}

impl Default for LoadOptionsBuilder {
    fn default() -> Self {
        Self {
            model: String::new(),
            model_file: None,
            backend: String::new(),
            asset_dir: PathBuf::from("."),
            external_backends: ExternalBackends::new(),
            isolation: ClientIsolation::Shared,
            single_active_backend: false,
            grpc_attempts: DEFAULT_GRPC_ATTEMPTS,
            grpc_attempt_delay: DEFAULT_GRPC_ATTEMPT_DELAY,
            threads: 0,
            load_model_options: LoadModelOptions::default(),
            cancel: None,
            working_dir: None,
        }
    }
}

impl LoadOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model_file(mut self, model_file: impl Into<String>) -> Self {
        self.model_file = Some(model_file.into());
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn asset_dir(mut self, asset_dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = asset_dir.into();
        self
    }

    pub fn external_backend(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.external_backends.insert(name, uri);
        self
    }

    pub fn external_backends(mut self, external_backends: ExternalBackends) -> Self {
        self.external_backends = external_backends;
        self
    }

    pub fn isolation(mut self, isolation: ClientIsolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn single_active_backend(mut self, enabled: bool) -> Self {
        self.single_active_backend = enabled;
        self
    }

    pub fn grpc_attempts(mut self, attempts: u32) -> Self {
        self.grpc_attempts = attempts;
        self
    }

    pub fn grpc_attempt_delay(mut self, delay: Duration) -> Self {
        self.grpc_attempt_delay = delay;
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn load_model_options(mut self, options: LoadModelOptions) -> Self {
        self.load_model_options = options;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<LoadOptions> {
        if self.model.trim().is_empty() {
            return Err(Error::config_field_invalid("model", "A model name is required"));
        }

        Ok(LoadOptions {
            model: self.model,
            model_file: self.model_file,
            backend: self.backend,
            asset_dir: self.asset_dir,
            external_backends: self.external_backends,
            isolation: self.isolation,
            single_active_backend: self.single_active_backend,
            grpc_attempts: self.grpc_attempts,
            grpc_attempt_delay: self.grpc_attempt_delay,
            threads: self.threads,
            load_model_options: self.load_model_options,
            cancel: self.cancel.unwrap_or_default(),
            working_dir: self.working_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let opts = LoadOptions::builder().model("phi-2").build().unwrap();

        assert_eq!(opts.model(), "phi-2");
        assert_eq!(opts.backend(), "");
        assert_eq!(opts.grpc_attempts(), 20);
        assert_eq!(opts.grpc_attempt_delay(), Duration::from_secs(2));
        assert_eq!(opts.isolation(), ClientIsolation::Shared);
        assert!(opts.model_file().is_none());
        assert!(!opts.cancel().is_cancelled());
    }

    #[test]
    fn test_builder_requires_model() {
        let err = LoadOptions::builder().backend("whisper").build().unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_with_backend_keeps_everything_else() {
        let token = CancellationToken::new();
        let opts = LoadOptions::builder()
            .model("m")
            .backend("a")
            .external_backend("remote", "10.0.0.2:9000")
            .isolation(ClientIsolation::PerCall)
            .cancel(token.clone())
            .build()
            .unwrap();

        let derived = opts.with_backend("b");
        assert_eq!(derived.backend(), "b");
        assert_eq!(derived.model(), "m");
        assert_eq!(derived.external_backends().get("remote"), Some("10.0.0.2:9000"));
        assert_eq!(derived.isolation(), ClientIsolation::PerCall);
        assert_eq!(opts.backend(), "a");

        token.cancel();
        assert!(derived.cancel().is_cancelled());
    }

    #[test]
    fn test_external_parse_splits_on_first_colon() {
        let parsed = ExternalBackend::parse("remote:127.0.0.1:9000").unwrap();
        assert_eq!(parsed.name, "remote");
        assert_eq!(parsed.uri, "127.0.0.1:9000");

        assert!(ExternalBackend::parse("no-separator").is_err());
        assert!(ExternalBackend::parse(":uri").is_err());
    }

    #[test]
    fn test_external_list_keeps_declaration_order() {
        let list = ExternalBackends::parse_list("z:/opt/z, a:localhost:1,m:/opt/m").unwrap();
        assert_eq!(list.names().collect::<Vec<_>>(), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_external_get_falls_back_to_case_insensitive() {
        let mut list = ExternalBackends::new();
        list.insert("MyBackend", "10.0.0.1:1");
        list.insert("mybackend", "10.0.0.2:2");

        assert_eq!(list.get("mybackend"), Some("10.0.0.2:2"));
        assert_eq!(list.get("MyBackend"), Some("10.0.0.1:1"));
        assert_eq!(list.get("MYBACKEND"), Some("10.0.0.1:1"));
        assert_eq!(list.get("other"), None);
    }

    #[test]
    fn test_external_insert_replaces_in_place() {
        let mut list = ExternalBackends::new();
        list.insert("a", "1");
        list.insert("b", "2");
        list.insert("a", "3");

        assert_eq!(list.len(), 2);
        assert_eq!(list.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(list.get("a"), Some("3"));
    }

    #[test]
    fn test_isolation_serde() {
        let parsed: ClientIsolation = serde_json::from_str("\"per-call\"").unwrap();
        assert_eq!(parsed, ClientIsolation::PerCall);
        assert_eq!(ClientIsolation::Shared.to_string(), "shared");
    }
}
