//! Structured event stream.
//!
//! The core never logs to disk; everything observable goes through this one
//! narrow interface. External collaborators (the menu-bar shell, tests) can
//! install their own sink; the default forwards to `tracing`.

use std::path::PathBuf;

/// Everything the core reports about itself.
#[derive(Debug, Clone)]
pub enum Event {
    PluginLoaded {
        path: PathBuf,
        bindings: Vec<String>,
    },
    PluginLoadError {
        path: PathBuf,
        detail: String,
    },
    PluginShadowed {
        binding: String,
        active: PathBuf,
        shadowed: PathBuf,
    },
    ResolveError {
        query: String,
        kind: &'static str,
        detail: String,
    },
    RequestTraced {
        query: String,
        target: String,
        elapsed_ms: u64,
    },
}

/// Pushable sink for [`Event`]s. The core only writes; it never reads back.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Default sink: forward everything to `tracing`.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::PluginLoaded { path, bindings } => {
                tracing::info!("Loaded plugin {:?} (bindings: {})", path, bindings.join(", "));
            }
            Event::PluginLoadError { path, detail } => {
                tracing::warn!("Failed to load plugin {:?}: {}", path, detail);
            }
            Event::PluginShadowed {
                binding,
                active,
                shadowed,
            } => {
                tracing::warn!(
                    "Binding '{}' from {:?} is shadowed by {:?}",
                    binding,
                    shadowed,
                    active
                );
            }
            Event::ResolveError {
                query,
                kind,
                detail,
            } => {
                tracing::warn!("Resolution error ({}) for '{}': {}", kind, query, detail);
            }
            Event::RequestTraced {
                query,
                target,
                elapsed_ms,
            } => {
                tracing::debug!("'{}' -> {} ({}ms)", query, target, elapsed_ms);
            }
        }
    }
}
