//! Registry of running backends
//!
//! Tracks one address per model name and the child process behind it, if
//! the loader spawned one. Loads for the same model are single-flight: the
//! first caller runs the spawn, concurrent callers wait for its result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backend::ModelAddress;
use crate::error::{Error, Result};

/// A backend child process owned by the registry
#[derive(Debug)]
pub struct BackendProcess {
    pub backend: String,
    pub address: ModelAddress,
    pub pid: Option<u32>,
    child: Child,
}

impl BackendProcess {
    pub fn new(backend: impl Into<String>, address: ModelAddress, child: Child) -> Self {
        Self {
            backend: backend.into(),
            address,
            pid: child.id(),
            child,
        }
    }

    /// Whether the process has exited. Errors while polling count as exited.
    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(mut self) -> std::io::Result<()> {
        match self.child.try_wait()? {
            Some(_) => Ok(()),
            None => self.child.kill().await,
        }
    }
}

type Slot = Arc<OnceCell<ModelAddress>>;

/// One live backend per model name
#[derive(Debug, Default)]
pub struct ModelRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    processes: Mutex<HashMap<String, BackendProcess>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the registered address for `model`, running `spawn` if there is none.
    ///
    /// A failed spawn leaves the slot empty so a later call can try again.
    pub async fn load_or_reuse<F, Fut>(&self, model: &str, spawn: F) -> Result<ModelAddress>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelAddress>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(model.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        if let Some(address) = slot.get() {
            debug!(model = %model, address = %address, "Reusing running backend");
            return Ok(address.clone());
        }

        let address = slot.get_or_try_init(spawn).await?;
        Ok(address.clone())
    }

    /// Address of a live backend for `model`, if any.
    ///
    /// An entry whose tracked child has exited is dropped.
    pub fn check_is_loaded(&self, model: &str) -> Option<ModelAddress> {
        let exited = {
            let mut processes = self.processes.lock();
            let gone = processes
                .get_mut(model)
                .map_or(false, BackendProcess::has_exited);
            if gone {
                processes.remove(model)
            } else {
                None
            }
        };

        if let Some(process) = exited {
            warn!(
                model = %model,
                backend = %process.backend,
                pid = ?process.pid,
                "Backend process exited, forgetting it"
            );
            self.slots.lock().remove(model);
            return None;
        }

        self.slots
            .lock()
            .get(model)
            .and_then(|slot| slot.get().cloned())
    }

    /// Take ownership of a spawned backend for `model`
    pub fn track(&self, model: &str, process: BackendProcess) {
        debug!(model = %model, backend = %process.backend, pid = ?process.pid, "Tracking backend process");
        if let Some(previous) = self.processes.lock().insert(model.to_string(), process) {
            warn!(model = %model, pid = ?previous.pid, "Replaced tracked backend process");
        }
    }

    /// Pid of the process serving `model`, if the loader spawned one
    pub fn tracked_pid(&self, model: &str) -> Option<u32> {
        self.processes.lock().get(model).and_then(|p| p.pid)
    }

    /// Names of models with a registered address, sorted
    pub fn loaded_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        models.sort();
        models
    }

    /// Forget `model` and stop its process
    pub async fn stop(&self, model: &str) -> Result<()> {
        self.slots.lock().remove(model);
        let process = self.processes.lock().remove(model);

        let Some(process) = process else {
            return Ok(());
        };

        let backend = process.backend.clone();
        let pid = process.pid;
        process.terminate().await.map_err(|e| Error::Eviction {
            model: model.to_string(),
            message: e.to_string(),
        })?;

        info!(model = %model, backend = %backend, pid = ?pid, "Stopped backend");
        Ok(())
    }

    /// Stop every backend except the one serving `keep`.
    ///
    /// Keeps going after a failure and reports the first one.
    pub async fn stop_all_except(&self, keep: &str) -> Result<()> {
        let mut first_error = None;
        for model in self.known_models() {
            if model == keep {
                continue;
            }
            if let Err(e) = self.stop(&model).await {
                warn!(model = %model, error = %e, "Failed to stop backend");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop every backend
    pub async fn stop_all(&self) -> Result<()> {
        self.stop_all_except("").await
    }

    fn known_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.slots.lock().keys().cloned().collect();
        for model in self.processes.lock().keys() {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models.sort();
        models
    }
}
