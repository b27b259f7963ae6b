//! Configuration system for modelport
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (MODELPORT_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{HttpClientFactory, LoadModelOptions};
use crate::error::{Error, Result};
use crate::loader::{ClientIsolation, ExternalBackend, ExternalBackends, LoadOptions, LoadOptionsBuilder};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Backend loading behavior
    pub loader: LoaderSettings,

    /// Model and working directories
    pub storage: StorageSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Backend loading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Directory containing backend-assets/grpc
    pub asset_dir: String,

    /// Inference threads passed to backends (0 = number of CPUs)
    pub threads: u32,

    /// Health probes before a backend counts as failed
    pub grpc_attempts: u32,

    /// Seconds between health probes
    pub grpc_attempt_delay_secs: u64,

    /// Stop other backends before loading a model
    pub single_active_backend: bool,

    /// Give every call its own client handle
    pub parallel_requests: bool,

    /// Context size in tokens
    pub context_size: u32,

    /// Layers to offload to GPU
    pub n_gpu_layers: u32,

    /// Use 16-bit floats where the backend supports it
    pub f16: bool,

    /// Memory-map model files
    pub mmap: bool,

    /// Timeout for the remote load call in seconds
    pub request_timeout_secs: u64,

    /// Backends outside the asset directory
    #[serde(default)]
    pub external_backends: Vec<ExternalBackend>,
}

/// Storage path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Model directory
    pub model_dir: String,

    /// Working directory for backend processes (unset = inherit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            asset_dir: "~/.modelport/assets".to_string(),
            threads: 0, // Auto-detect
            grpc_attempts: 20,
            grpc_attempt_delay_secs: 2,
            single_active_backend: false,
            parallel_requests: false,
            context_size: 512,
            n_gpu_layers: 0,
            f16: false,
            mmap: true,
            request_timeout_secs: 300,
            external_backends: vec![],
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            model_dir: "~/.modelport/models".to_string(),
            working_dir: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides()?;

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("modelport.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("modelport").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".modelport").join("config.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/modelport/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // Loader settings
        if let Ok(val) = std::env::var("MODELPORT_ASSET_DIR") {
            self.loader.asset_dir = val;
        }
        if let Ok(val) = std::env::var("MODELPORT_THREADS") {
            if let Ok(n) = val.parse() {
                self.loader.threads = n;
            }
        }
        if let Ok(val) = std::env::var("MODELPORT_GRPC_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.loader.grpc_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("MODELPORT_GRPC_ATTEMPT_DELAY_SECS") {
            if let Ok(n) = val.parse() {
                self.loader.grpc_attempt_delay_secs = n;
            }
        }
        if let Ok(val) = std::env::var("MODELPORT_SINGLE_ACTIVE_BACKEND") {
            self.loader.single_active_backend = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("MODELPORT_PARALLEL_REQUESTS") {
            self.loader.parallel_requests = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("MODELPORT_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.loader.request_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("MODELPORT_EXTERNAL_BACKENDS") {
            let mut merged: ExternalBackends = self.loader.external_backends.drain(..).collect();
            for entry in ExternalBackends::parse_list(&val)?.iter() {
                merged.insert(entry.name.clone(), entry.uri.clone());
            }
            self.loader.external_backends = merged.iter().cloned().collect();
        }

        // Storage settings
        if let Ok(val) = std::env::var("MODELPORT_MODEL_DIR") {
            self.storage.model_dir = val;
        }
        if let Ok(val) = std::env::var("MODELPORT_WORKING_DIR") {
            self.storage.working_dir = Some(val);
        }

        // Logging settings
        if let Ok(val) = std::env::var("MODELPORT_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("MODELPORT_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("MODELPORT_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }

        Ok(())
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.loader.asset_dir = expand_path(&self.loader.asset_dir);
        self.storage.model_dir = expand_path(&self.storage.model_dir);

        if let Some(ref dir) = self.storage.working_dir {
            self.storage.working_dir = Some(expand_path(dir));
        }
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        for external in &mut self.loader.external_backends {
            if external.uri.starts_with('~') || external.uri.starts_with('$') {
                external.uri = expand_path(&external.uri);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.loader.asset_dir.trim().is_empty() {
            return Err(Error::config_field_invalid("loader.asset_dir", "asset_dir cannot be empty"));
        }

        if self.loader.grpc_attempts == 0 {
            return Err(Error::config_field_invalid(
                "loader.grpc_attempts",
                "grpc_attempts must be at least 1",
            ));
        }

        if self.loader.request_timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "loader.request_timeout_secs",
                "request_timeout_secs must be at least 1",
            ));
        }

        for external in &self.loader.external_backends {
            if external.name.trim().is_empty() || external.uri.trim().is_empty() {
                return Err(Error::config_field_invalid(
                    "loader.external_backends",
                    "external backends need both a name and a uri",
                ));
            }
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Get the asset directory as a PathBuf
    pub fn asset_dir(&self) -> PathBuf {
        PathBuf::from(&self.loader.asset_dir)
    }

    /// Get the model directory as a PathBuf
    pub fn model_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.model_dir)
    }

    /// Thread count with 0 resolved to the number of CPUs
    pub fn effective_threads(&self) -> u32 {
        match self.loader.threads {
            0 => num_cpus::get() as u32,
            n => n,
        }
    }

    pub fn isolation(&self) -> ClientIsolation {
        if self.loader.parallel_requests {
            ClientIsolation::PerCall
        } else {
            ClientIsolation::Shared
        }
    }

    pub fn external_backends(&self) -> ExternalBackends {
        self.loader.external_backends.iter().cloned().collect()
    }

    /// HTTP client factory honoring the configured timeouts
    pub fn client_factory(&self) -> HttpClientFactory {
        HttpClientFactory {
            request_timeout: Duration::from_secs(self.loader.request_timeout_secs),
            ..Default::default()
        }
    }

    /// Load options for `model` with every configured default applied
    pub fn load_options(&self, model: &str) -> LoadOptionsBuilder {
        let threads = self.effective_threads();
        let remote = LoadModelOptions {
            model_path: self.storage.model_dir.clone(),
            threads,
            context_size: self.loader.context_size,
            n_gpu_layers: self.loader.n_gpu_layers,
            f16: self.loader.f16,
            mmap: self.loader.mmap,
            ..Default::default()
        };

        let mut builder = LoadOptions::builder()
            .model(model)
            .asset_dir(self.asset_dir())
            .external_backends(self.external_backends())
            .isolation(self.isolation())
            .single_active_backend(self.loader.single_active_backend)
            .grpc_attempts(self.loader.grpc_attempts)
            .grpc_attempt_delay(Duration::from_secs(self.loader.grpc_attempt_delay_secs))
            .threads(threads)
            .load_model_options(remote);

        if let Some(ref dir) = self.storage.working_dir {
            builder = builder.working_dir(dir);
        }
        builder
    }
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location for `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modelport")
        .join("config.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(&config_path, generate_default_config())?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# modelport configuration

[loader]
# Directory containing backend-assets/grpc/<backend>
asset_dir = "~/.modelport/assets"

# Inference threads passed to backends (0 = number of CPUs)
threads = 0

# Health probes before a backend counts as failed, and seconds between them
grpc_attempts = 20
grpc_attempt_delay_secs = 2

# Stop every other backend before loading a model
single_active_backend = false

# Give every call its own client handle instead of sharing one per backend
parallel_requests = false

# Defaults sent with every load
context_size = 512
n_gpu_layers = 0
f16 = false
mmap = true

# Timeout for the remote load call in seconds
request_timeout_secs = 300

# Backends outside the asset directory. A uri naming an existing file is
# started like any other backend; anything else is used as an endpoint.
# [[loader.external_backends]]
# name = "my-backend"
# uri = "127.0.0.1:50051"

[storage]
# Model directory
model_dir = "~/.modelport/models"

# Working directory for backend processes (comment out to inherit)
# working_dir = "~/.modelport/run"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.modelport/logs/modelport.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
