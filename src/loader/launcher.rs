//! Backend process launcher
//!
//! Starts (or locates) a backend, waits until it answers health probes and
//! asks it to load the model.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::backend::{backend_path, ClientFactory, ModelAddress, SharedClient};
use crate::error::{Error, Result};

use super::options::LoadOptions;
use super::registry::{BackendProcess, ModelRegistry};

/// Log target for lines a backend writes to stdout/stderr
pub const BACKEND_OUTPUT_TARGET: &str = "modelport::backend_output";

/// Cache locations defaulted to the model directory
const MODEL_CACHE_ENV: &[&str] = &["HF_HOME", "TRANSFORMERS_CACHE", "HUGGINGFACE_HUB_CACHE"];

/// Point the model-hub cache variables at `model_path` unless already set
pub fn set_model_cache_env(model_path: &Path) {
    for var in MODEL_CACHE_ENV {
        let unset = std::env::var_os(var).map_or(true, |v| v.is_empty());
        if unset {
            debug!(var = %var, value = %model_path.display(), "Defaulting cache location");
            std::env::set_var(var, model_path);
        }
    }
}

/// Bind an ephemeral loopback port and release it
pub fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|source| Error::PortAllocation { source })?;
    let port = listener
        .local_addr()
        .map_err(|source| Error::PortAllocation { source })?
        .port();
    Ok(port)
}

pub struct ProcessLauncher {
    model_path: PathBuf,
    registry: Arc<ModelRegistry>,
    factory: Arc<dyn ClientFactory>,
}

impl ProcessLauncher {
    pub fn new(model_path: impl Into<PathBuf>, registry: Arc<ModelRegistry>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            model_path: model_path.into(),
            registry,
            factory,
        }
    }

    /// Bring `backend` up for `options.model()` and return its address.
    ///
    /// A process spawned here is tracked in the registry once the model is
    /// loaded, and killed if any later step fails.
    pub async fn launch(&self, backend: &str, options: &LoadOptions) -> Result<ModelAddress> {
        set_model_cache_env(&self.model_path);

        let (address, child) = match options.external_backends().get(backend) {
            Some(uri) if Path::new(uri).exists() => {
                info!(backend = %backend, path = %uri, "Starting external backend");
                let (address, child) = self.spawn(backend, Path::new(uri), options)?;
                (address, Some(child))
            }
            Some(uri) => {
                info!(backend = %backend, endpoint = %uri, "Using external backend endpoint");
                (ModelAddress::new(uri), None)
            }
            None => {
                let path = backend_path(options.asset_dir(), backend);
                if !path.exists() {
                    return Err(Error::BackendNotFound { path });
                }
                let (address, child) = self.spawn(backend, &path, options)?;
                (address, Some(child))
            }
        };

        match self.connect_and_load(&address, options).await {
            Ok(()) => {
                if let Some(child) = child {
                    self.registry
                        .track(options.model(), BackendProcess::new(backend, address.clone(), child));
                }
                Ok(address)
            }
            Err(e) => {
                if let Some(child) = child {
                    discard(backend, child).await;
                }
                Err(e)
            }
        }
    }

    async fn connect_and_load(&self, address: &ModelAddress, options: &LoadOptions) -> Result<()> {
        let client = self.factory.connect(address)?;
        wait_ready(&client, options).await?;
        self.remote_load(&client, options).await
    }

    fn spawn(&self, backend: &str, path: &Path, options: &LoadOptions) -> Result<(ModelAddress, Child)> {
        let port = free_port()?;
        let address = ModelAddress::loopback(port);

        make_executable(path)?;

        let mut command = Command::new(path);
        command
            .arg("--addr")
            .arg(address.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = options.working_dir() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| Error::ProcessStart {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(backend.to_string(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(backend.to_string(), "stderr", stderr));
        }

        info!(
            backend = %backend,
            path = %path.display(),
            address = %address,
            pid = ?child.id(),
            "Started backend process"
        );
        Ok((address, child))
    }

    async fn remote_load(&self, client: &SharedClient, options: &LoadOptions) -> Result<()> {
        let mut request = options.load_model_options().clone();
        request.model = options.model().to_string();
        request.model_file = self
            .model_path
            .join(options.model_file().unwrap_or(options.model()))
            .display()
            .to_string();
        if request.model_path.is_empty() {
            request.model_path = self.model_path.display().to_string();
        }
        if request.threads == 0 {
            request.threads = options.threads();
        }

        let address = client.address().clone();
        debug!(address = %address, model = %request.model, file = %request.model_file, "Loading model");

        let result = tokio::select! {
            _ = options.cancel().cancelled() => {
                return Err(Error::Cancelled(format!("model load on {}", address)));
            }
            result = client.load_model(&request) => result,
        };

        let result = result.map_err(|e| Error::remote_load(&address, e.to_string()))?;
        if !result.success {
            return Err(Error::remote_load(&address, result.message));
        }

        info!(address = %address, model = %request.model, "Model loaded");
        Ok(())
    }
}

/// Probe `client` until it reports alive, the attempts run out or the load is cancelled
async fn wait_ready(client: &SharedClient, options: &LoadOptions) -> Result<()> {
    let attempts = options.grpc_attempts();
    let delay = options.grpc_attempt_delay();
    let cancel = options.cancel();
    let address = client.address();

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("readiness wait for {}", address)));
        }

        let probe = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!("readiness wait for {}", address)));
            }
            probe = client.health_check() => probe,
        };

        match probe {
            Ok(true) => {
                debug!(address = %address, attempt, "Backend is ready");
                return Ok(());
            }
            Ok(false) => debug!(address = %address, attempt, attempts, "Backend not ready yet"),
            Err(e) if attempt == attempts => {
                warn!(address = %address, attempt, error = %e, "Final readiness probe failed");
            }
            Err(e) => debug!(address = %address, attempt, error = %e, "Readiness probe failed"),
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("readiness wait for {}", address)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(Error::ServiceNotReady {
        address: address.to_string(),
        attempts,
    })
}

async fn forward_output<R>(backend: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    // Drain until EOF. Closing the pipe early would kill the backend with SIGPIPE.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                info!(target: BACKEND_OUTPUT_TARGET, backend = %backend, stream, "{}", line);
            }
            Err(e) => {
                debug!(backend = %backend, stream, error = %e, "Stopped reading backend output");
                break;
            }
        }
    }
}

async fn discard(backend: &str, mut child: Child) {
    let pid = child.id();
    if let Err(e) = child.kill().await {
        warn!(backend = %backend, pid = ?pid, error = %e, "Failed to kill backend process");
    } else {
        debug!(backend = %backend, pid = ?pid, "Killed backend process");
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let start_error = |e: std::io::Error| Error::ProcessStart {
        path: path.to_path_buf(),
        message: format!("cannot make executable: {}", e),
    };

    let mut permissions = std::fs::metadata(path).map_err(start_error)?.permissions();
    let mode = permissions.mode();
    if mode & 0o700 != 0o700 {
        permissions.set_mode(mode | 0o700);
        std::fs::set_permissions(path, permissions).map_err(start_error)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
