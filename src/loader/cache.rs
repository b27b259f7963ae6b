//! Client handle cache

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{ClientFactory, ModelAddress, SharedClient};
use crate::error::Result;

use super::options::ClientIsolation;

/// Memoizes one client handle per backend address
#[derive(Default)]
pub struct ClientCache {
    clients: Mutex<HashMap<ModelAddress, SharedClient>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for `address`.
    ///
    /// Per-call isolation always builds a new handle. Shared isolation builds
    /// one handle per address and hands it out from then on.
    pub fn resolve(
        &self,
        address: &ModelAddress,
        isolation: ClientIsolation,
        factory: &dyn ClientFactory,
    ) -> Result<SharedClient> {
        if isolation.is_per_call() {
            debug!(address = %address, "Creating per-call client");
            return factory.connect(address);
        }

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(address) {
            return Ok(client.clone());
        }

        debug!(address = %address, "Creating shared client");
        let client = factory.connect(address)?;
        clients.insert(address.clone(), client.clone());
        Ok(client)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
