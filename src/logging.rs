//! Logging setup with tracing + tracing-subscriber
//!
//! Everything goes to stderr so stdout stays free for the model address.
//! An optional log file rotates daily. Backend process output is emitted
//! under [`BACKEND_OUTPUT_TARGET`], so `RUST_LOG=modelport::backend_output=off`
//! hides it while keeping the loader's own messages.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};
use crate::loader::BACKEND_OUTPUT_TARGET;

/// Chatty dependencies capped at warn unless RUST_LOG says otherwise
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "reqwest", "rustls", "h2"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer alive; dropping it flushes pending lines
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);

    let mut layers: Vec<BoxedLayer> = vec![output_layer(std::io::stderr, settings.json_format, true)];

    let file_guard = match settings.file.as_deref() {
        Some(file) => {
            let (writer, guard) = rolling_writer(Path::new(file), settings.max_files)?;
            layers.push(output_layer(writer, settings.json_format, false));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(level_filter(level, quiet))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(level = %level, file = ?settings.file, json = settings.json_format, "Logging initialized");

    Ok(LogGuards { _file_guard: file_guard })
}

/// `-q` wins, then `-v`/`-vv`, then the configured level
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => settings.level.parse().unwrap_or(Level::INFO),
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

fn level_filter(level: Level, quiet: bool) -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        return EnvFilter::from_default_env();
    }

    let mut directives = vec![level.as_str().to_lowercase()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|dep| format!("{}=warn", dep)));
    if quiet {
        directives.push(format!("{}=off", BACKEND_OUTPUT_TARGET));
    }

    EnvFilter::new(directives.join(","))
}

fn output_layer<W>(writer: W, json: bool, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(ansi)
            .boxed()
    }
}

/// Non-blocking writer for `<dir>/<name>.<date>.log`, keeping `max_files` days
fn rolling_writer(
    file: &Path,
    max_files: u32,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let directory = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&directory).map_err(|e| {
        Error::Config(format!("Failed to create log directory '{}': {}", directory.display(), e))
    })?;

    let prefix = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("modelport");

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1) as usize)
        .build(&directory)
        .map_err(|e| Error::Config(format!("Failed to create log file appender: {}", e)))?;

    Ok(tracing_appender::non_blocking(appender))
}
