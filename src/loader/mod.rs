//! Backend process lifecycle and model loading
//!
//! This module turns a model name into a ready client handle: it starts or
//! locates a backend, waits for it, asks it to load the model, and keeps
//! track of what is running.

mod options;
mod registry;
mod launcher;
mod cache;
mod model_loader;

pub use options::*;
pub use launcher::BACKEND_OUTPUT_TARGET;
pub use model_loader::{greedy_candidates, ModelLoader};
