//! Error types for modelport
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly hints for the CLI
//! - Stage context that wraps without reclassifying
//! - An aggregate error for greedy loading

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,
    AssetDirUnreadable = 103,

    // IO errors (2xx)
    IoRead = 200,
    IoPermission = 202,
    IoNotFound = 203,

    // Backend resolution errors (3xx)
    BackendNotFound = 300,
    PortAllocation = 301,

    // Process errors (4xx)
    ProcessStart = 400,
    ServiceNotReady = 401,
    Eviction = 402,

    // Remote call errors (5xx)
    RemoteLoad = 500,
    Transport = 501,

    // Loader errors (6xx)
    AllBackendsFailed = 600,
    Cancelled = 601,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One candidate's failure inside a greedy load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
    pub code: ErrorCode,
}

impl BackendFailure {
    pub fn new(backend: impl Into<String>, error: &Error) -> Self {
        Self {
            backend: backend.into(),
            reason: error.to_string(),
            code: error.code(),
        }
    }
}

fn format_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends available".to_string();
    }
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.backend, f.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend asset directory could not be listed
    #[error("Cannot read backend asset directory {path}: {source}")]
    AssetDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────
    // Backend Resolution Errors
    // ─────────────────────────────────────────────────────────────

    /// No executable for the backend under the asset directory
    #[error("Backend process not found: {path}. Some backends (stablediffusion, tinydream, piper) are only present in builds with optional features enabled")]
    BackendNotFound { path: PathBuf },

    /// No free local port could be reserved
    #[error("Failed allocating free port: {source}")]
    PortAllocation {
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────

    /// Backend executable could not be started
    #[error("Failed to start backend process {path}: {message}")]
    ProcessStart { path: PathBuf, message: String },

    /// Readiness polling exhausted every attempt
    #[error("Backend service at {address} not ready after {attempts} attempt(s)")]
    ServiceNotReady { address: String, attempts: u32 },

    /// Stopping other backends failed
    #[error("Failed to stop backend for model '{model}': {message}")]
    Eviction { model: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Remote Call Errors
    // ─────────────────────────────────────────────────────────────

    /// Remote load call failed or was rejected
    #[error("Could not load model on {address}: {message}")]
    RemoteLoad { address: String, message: String },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ─────────────────────────────────────────────────────────────
    // Loader Errors
    // ─────────────────────────────────────────────────────────────

    /// Every greedy candidate failed
    #[error("Could not load model '{model}' - all backends returned error:\n{}", format_failures(.failures))]
    AllBackendsFailed {
        model: String,
        failures: Vec<BackendFailure>,
    },

    /// The load was cancelled by the caller
    #[error("Load cancelled: {0}")]
    Cancelled(String),

    /// Context for the stage that failed; classification follows the source
    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────
    // Generic Errors
    // ─────────────────────────────────────────────────────────────

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,
            Error::AssetDirUnreadable { .. } => ErrorCode::AssetDirUnreadable,

            Error::BackendNotFound { .. } => ErrorCode::BackendNotFound,
            Error::PortAllocation { .. } => ErrorCode::PortAllocation,

            Error::ProcessStart { .. } => ErrorCode::ProcessStart,
            Error::ServiceNotReady { .. } => ErrorCode::ServiceNotReady,
            Error::Eviction { .. } => ErrorCode::Eviction,

            Error::RemoteLoad { .. } => ErrorCode::RemoteLoad,
            Error::Http(_) => ErrorCode::Transport,

            // A walk that ended on cancellation reports as cancelled
            Error::AllBackendsFailed { failures, .. } => match failures.last() {
                Some(last) if last.code == ErrorCode::Cancelled => ErrorCode::Cancelled,
                _ => ErrorCode::AllBackendsFailed,
            },
            Error::Cancelled(_) => ErrorCode::Cancelled,
            Error::Stage { source, .. } => source.code(),

            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if retrying the same load might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Stage { source, .. } => source.is_retryable(),
            Error::PortAllocation { .. }
            | Error::ServiceNotReady { .. }
            | Error::Http(_)
            | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Wrap this error with the name of the stage that produced it
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Error::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Stage { source, .. } => source.suggestion(),
            Error::ConfigNotFound { .. } => Some(
                "Run 'modelport config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'modelport config validate' to see details."
            ),
            Error::AssetDirUnreadable { .. } => Some(
                "Point 'asset_dir' at a directory containing backend-assets/grpc."
            ),
            Error::BackendNotFound { .. } => Some(
                "Install the backend executable under backend-assets/grpc, or declare it as an external backend."
            ),
            Error::ServiceNotReady { .. } => Some(
                "The backend did not answer health checks in time. Raise 'grpc_attempts' or 'grpc_attempt_delay_secs'."
            ),
            Error::AllBackendsFailed { .. } => Some(
                "Pin a backend with --backend, or check the per-backend reasons above."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn remote_load(address: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::RemoteLoad {
            address: address.to_string(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
