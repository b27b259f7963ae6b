//! Backend asset discovery
//!
//! Scans `<asset_dir>/backend-assets/grpc` for backend executables and
//! orders them for greedy loading: engines that handle the most model
//! formats go first, the slow catch-all ones go last.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

use super::KnownBackend;

/// Backends tried first, in this order
const PRIORITY: &[KnownBackend] = &[
    KnownBackend::LlamaCpp,
    KnownBackend::LlamaCppFallback,
    KnownBackend::LlamaGgml,
    KnownBackend::Gpt4All,
];

/// Backends pushed to the end. The first entry ends up last overall.
const TAIL: &[KnownBackend] = &[KnownBackend::Huggingface, KnownBackend::BertEmbeddings];

/// Entries never offered as greedy candidates
const EXCLUDED: &[KnownBackend] = &[KnownBackend::LocalStore];

/// Directory holding backend executables under an asset dir
pub fn grpc_dir(asset_dir: &Path) -> PathBuf {
    asset_dir.join("backend-assets").join("grpc")
}

/// Conventional path of a backend executable
pub fn backend_path(asset_dir: &Path, backend: &str) -> PathBuf {
    grpc_dir(asset_dir).join(backend)
}

/// List the backends installed under `asset_dir`, in greedy-load order.
pub fn list_backends(asset_dir: &Path) -> Result<Vec<String>> {
    let dir = grpc_dir(asset_dir);
    let entries = fs::read_dir(&dir).map_err(|source| Error::AssetDirUnreadable {
        path: dir.clone(),
        source,
    })?;

    let mut scanned = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::AssetDirUnreadable {
            path: dir.clone(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if EXCLUDED.iter().any(|b| b.name() == name) {
            continue;
        }
        // Follows symlinks so a linked executable still counts as a file
        let is_file = fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false);
        if is_file {
            scanned.push(name);
        }
    }
    scanned.sort();

    let ordered = order_candidates(scanned);
    debug!(dir = %dir.display(), backends = ?ordered, "Discovered backends");
    Ok(ordered)
}

/// Apply the priority and tail passes to a scan-ordered list.
///
/// Each pass walks its table in reverse and moves every match to the
/// front (priority) or back (tail). Priority entries therefore keep their
/// declared order, while tail entries end up in reverse declared order.
pub fn order_candidates(mut backends: Vec<String>) -> Vec<String> {
    for wanted in PRIORITY.iter().rev() {
        if let Some(pos) = backends.iter().position(|b| b == wanted.name()) {
            let found = backends.remove(pos);
            backends.insert(0, found);
        }
    }

    for wanted in TAIL.iter().rev() {
        if let Some(pos) = backends.iter().position(|b| b == wanted.name()) {
            let found = backends.remove(pos);
            backends.push(found);
        }
    }

    backends
}
