//! Backend identification, discovery and remote calls
//!
//! This module knows which backends exist, where their executables live,
//! which CPU build to prefer, and how to talk to a running instance.

mod ids;
mod discovery;
mod hardware;
mod client;

#[cfg(test)]
pub(crate) mod mock;

pub use ids::*;
pub use discovery::*;
pub use hardware::*;
pub use client::*;
