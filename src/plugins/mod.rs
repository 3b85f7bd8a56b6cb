//! Lua plugin system: every command binding is backed by a plugin.
//!
//! A plugin is a single `.lua` file defining two globals:
//! - `info()` returning `{ bindings, description, example }`
//! - `process(full_args)` returning a redirect URL
//!
//! Plugins are discovered from the user and system command directories (plus
//! any extras from the config), loaded into sandboxed Lua states, and indexed
//! by their lowercased bindings. See [`registry`] for lifecycle and
//! [`sandbox`] for the isolation rules.

pub mod api;
pub mod loader;
pub mod registry;
pub mod sandbox;

pub use registry::{Plugin, PluginRegistry, RegistrySnapshot};

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the script host and surfaced through the resolver.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to load plugin {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("plugin {} declared invalid metadata: {message}", path.display())]
    Info { path: PathBuf, message: String },

    #[error("plugin {} process() failed: {message}", path.display())]
    Process { path: PathBuf, message: String },

    #[error("plugin {} exceeded its {timeout_ms}ms budget", path.display())]
    Timeout { path: PathBuf, timeout_ms: u64 },

    #[error("plugin {} hit its resource limit: {message}", path.display())]
    Resource { path: PathBuf, message: String },

    #[error("plugin {} returned a non-URL result: {message}", path.display())]
    BadOutput { path: PathBuf, message: String },

    #[error("no execution context available for plugin {}", path.display())]
    Busy { path: PathBuf },

    #[error("plugin host internal error: {0}")]
    Internal(String),
}

impl PluginError {
    /// Stable kind tag used in `resolve_error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::Load { .. } => "load",
            PluginError::Info { .. } => "info",
            PluginError::Process { .. } => "process",
            PluginError::Timeout { .. } => "timeout",
            PluginError::Resource { .. } => "resource",
            PluginError::BadOutput { .. } => "bad_output",
            PluginError::Busy { .. } => "busy",
            PluginError::Internal(_) => "internal",
        }
    }
}
