//! Plugin registry: materializes the on-disk plugin set into an immutable
//! snapshot and owns the per-plugin execution context pools.
//!
//! A build enumerates candidates in deterministic order, loads each through
//! the script host, and composes a fresh binding index. Publication is one
//! atomic `Arc` swap; requests that are mid-flight keep the snapshot they
//! started with.

use mlua::Lua;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::{BunnylolConfig, CONTEXT_CHECKOUT_TIMEOUT_MS, CONTEXT_POOL_CAP};
use crate::core::events::{Event, EventSink};

use super::loader::{self, PluginSpec};
use super::PluginError;

/// A loaded plugin: immutable metadata plus a bounded pool of Lua contexts.
///
/// Contexts are not thread-safe, so each `process` call leases one
/// exclusively; the pool grows lazily up to [`CONTEXT_POOL_CAP`].
pub struct Plugin {
    path: PathBuf,
    bindings: Vec<String>,
    description: String,
    example: String,
    source: String,
    timeout: Duration,
    idle: Mutex<Vec<Lua>>,
    permits: Arc<Semaphore>,
}

impl Plugin {
    fn new(spec: PluginSpec, warm: Lua, timeout: Duration) -> Self {
        Self {
            path: spec.path,
            bindings: spec.bindings,
            description: spec.description,
            example: spec.example,
            source: spec.source,
            timeout,
            idle: Mutex::new(vec![warm]),
            permits: Arc::new(Semaphore::new(CONTEXT_POOL_CAP)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared bindings, in declaration order; the first is primary.
    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn example(&self) -> &str {
        &self.example
    }

    /// Run `process(query)` on a leased execution context.
    ///
    /// The lease is exclusive for the duration of the call; if no context
    /// frees up within the checkout window the caller gets `Busy` and is
    /// expected to take the resolver fallback.
    pub async fn process(&self, query: &str) -> Result<String, PluginError> {
        let checkout = Duration::from_millis(CONTEXT_CHECKOUT_TIMEOUT_MS);
        let permit = match tokio::time::timeout(checkout, self.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                return Err(PluginError::Busy {
                    path: self.path.clone(),
                })
            }
        };

        let leased = self.idle.lock().unwrap().pop();
        let source = self.source.clone();
        let path = self.path.clone();
        let timeout = self.timeout;
        let query = query.to_string();

        let (context, result) = tokio::task::spawn_blocking(move || {
            let lua = match leased {
                Some(lua) => lua,
                None => match loader::create_context(&source, &path, timeout) {
                    Ok(lua) => lua,
                    Err(e) => return (None, Err(e)),
                },
            };
            let result = loader::invoke_process(&lua, &path, &query, timeout);
            (Some(lua), result)
        })
        .await
        .map_err(|e| PluginError::Internal(e.to_string()))?;

        if let Some(lua) = context {
            self.idle.lock().unwrap().push(lua);
        }
        drop(permit);
        result
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("path", &self.path)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Immutable publication of the current plugin set and binding index.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    plugins: Vec<Arc<Plugin>>,
    index: HashMap<String, Vec<Arc<Plugin>>>,
}

impl RegistrySnapshot {
    /// Active plugin for a binding, or `None`. Lookup is case-insensitive.
    pub fn resolve(&self, binding: &str) -> Option<&Arc<Plugin>> {
        self.index.get(&binding.to_lowercase())?.first()
    }

    /// All loaded plugins, in build (source path) order.
    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    /// Active plugins only, sorted by first declared binding.
    pub fn list(&self) -> Vec<&Arc<Plugin>> {
        let mut active: Vec<&Arc<Plugin>> = self
            .plugins
            .iter()
            .filter(|plugin| {
                plugin.bindings().iter().any(|binding| {
                    self.resolve(binding)
                        .is_some_and(|active| Arc::ptr_eq(active, *plugin))
                })
            })
            .collect();
        active.sort_by_key(|plugin| {
            plugin
                .bindings()
                .first()
                .map(|b| b.to_lowercase())
                .unwrap_or_default()
        });
        active
    }

    pub fn binding_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Outcome of a registry build, reported by `/reload`.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub bindings: usize,
}

/// The registry owns the current snapshot pointer.
pub struct PluginRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    events: Arc<dyn EventSink>,
}

impl PluginRegistry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            events,
        }
    }

    /// The currently published snapshot. Callers keep the `Arc` for the
    /// whole request so a concurrent reload cannot pull plugins out from
    /// under them.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().unwrap().clone()
    }

    /// Build a fresh snapshot from disk and publish it atomically.
    ///
    /// A build in which every candidate fails (or no directory could be
    /// enumerated while plugins were previously loaded) does not publish;
    /// the previous snapshot stays active.
    pub async fn rebuild(&self, config: &BunnylolConfig) -> Result<BuildSummary, PluginError> {
        let dirs = config.discovery_dirs();
        let timeout = config.plugin_timeout();
        let events = self.events.clone();

        let (snapshot, summary) =
            tokio::task::spawn_blocking(move || build_snapshot(&dirs, timeout, events.as_ref()))
                .await
                .map_err(|e| PluginError::Internal(e.to_string()))?;

        // A rebuild that produces nothing while plugins are currently live is
        // a failed reload (directories gone, or every candidate broken), not
        // a request to forget everything.
        if summary.loaded == 0 && !self.snapshot().is_empty() {
            return Err(PluginError::Internal(format!(
                "reload loaded no plugins ({} candidate(s) failed), keeping previous snapshot",
                summary.skipped
            )));
        }

        *self.current.write().unwrap() = Arc::new(snapshot);
        Ok(summary)
    }
}

/// Build protocol: enumerate, load, index, compose.
fn build_snapshot(
    dirs: &[PathBuf],
    timeout: Duration,
    events: &dyn EventSink,
) -> (RegistrySnapshot, BuildSummary) {
    let candidates = loader::discover(dirs);
    debug!("Discovered {} plugin candidate(s)", candidates.len());

    let mut plugins: Vec<Arc<Plugin>> = Vec::new();
    let mut summary = BuildSummary::default();

    for path in &candidates {
        match loader::load_plugin(path, timeout) {
            Ok((spec, warm)) => {
                events.emit(&Event::PluginLoaded {
                    path: spec.path.clone(),
                    bindings: spec.bindings.clone(),
                });
                plugins.push(Arc::new(Plugin::new(spec, warm, timeout)));
                summary.loaded += 1;
            }
            Err(e) => {
                events.emit(&Event::PluginLoadError {
                    path: path.clone(),
                    detail: e.to_string(),
                });
                summary.skipped += 1;
            }
        }
    }

    let mut index: HashMap<String, Vec<Arc<Plugin>>> = HashMap::new();
    for plugin in &plugins {
        for binding in plugin.bindings() {
            index
                .entry(binding.to_lowercase())
                .or_default()
                .push(plugin.clone());
        }
    }

    for (binding, claimants) in &index {
        for shadowed in &claimants[1..] {
            events.emit(&Event::PluginShadowed {
                binding: binding.clone(),
                active: claimants[0].path().to_path_buf(),
                shadowed: shadowed.path().to_path_buf(),
            });
        }
    }

    summary.bindings = index.len();
    (RegistrySnapshot { plugins, index }, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::LogSink;
    use std::fs;

    fn plugin_source(binding: &str, url: &str) -> String {
        format!(
            r#"
function info()
  return {{ bindings = {{ "{binding}" }}, description = "d", example = "e" }}
end

function process(full_args)
  return "{url}"
end
"#
        )
    }

    fn test_config(dir: &Path) -> BunnylolConfig {
        BunnylolConfig {
            plugin_dirs: vec![dir.to_path_buf()],
            ..Default::default()
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(LogSink))
    }

    #[tokio::test]
    async fn test_build_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.lua"), plugin_source("gh", "https://a")).unwrap();

        let registry = registry();
        let summary = registry.rebuild(&test_config(dir.path())).await.unwrap();
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.bindings, 1);

        let snapshot = registry.snapshot();
        assert!(snapshot.resolve("gh").is_some());
        assert!(snapshot.resolve("GH").is_some());
        assert!(snapshot.resolve("nope").is_none());
    }

    #[tokio::test]
    async fn test_shadowing_is_lexicographic_by_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.lua"), plugin_source("gh", "https://b")).unwrap();
        fs::write(dir.path().join("a.lua"), plugin_source("gh", "https://a")).unwrap();

        let registry = registry();
        registry.rebuild(&test_config(dir.path())).await.unwrap();

        let snapshot = registry.snapshot();
        let active = snapshot.resolve("gh").unwrap();
        assert!(active.path().ends_with("a.lua"));
        assert_eq!(active.process("gh").await.unwrap(), "https://a");

        // Renaming the shadowed file ahead of the other flips the decision.
        fs::rename(dir.path().join("b.lua"), dir.path().join("0.lua")).unwrap();
        registry.rebuild(&test_config(dir.path())).await.unwrap();
        let snapshot = registry.snapshot();
        let active = snapshot.resolve("gh").unwrap();
        assert!(active.path().ends_with("0.lua"));
        assert_eq!(active.process("gh").await.unwrap(), "https://b");
    }

    #[tokio::test]
    async fn test_broken_plugin_does_not_abort_build() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.lua"), plugin_source("ok", "https://ok")).unwrap();
        fs::write(dir.path().join("broken.lua"), "function info( nope").unwrap();

        let registry = registry();
        let summary = registry.rebuild(&test_config(dir.path())).await.unwrap();
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped, 1);
        assert!(registry.snapshot().resolve("ok").is_some());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.lua"), plugin_source("ok", "https://ok")).unwrap();

        let registry = registry();
        registry.rebuild(&test_config(dir.path())).await.unwrap();
        let before = registry.snapshot();

        // Every candidate now fails to load.
        fs::write(dir.path().join("ok.lua"), "function info( nope").unwrap();
        assert!(registry.rebuild(&test_config(dir.path())).await.is_err());

        let after = registry.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.resolve("ok").is_some());
    }

    #[tokio::test]
    async fn test_in_flight_snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.lua"), plugin_source("a", "https://a")).unwrap();

        let registry = registry();
        registry.rebuild(&test_config(dir.path())).await.unwrap();
        let held = registry.snapshot();

        fs::remove_file(dir.path().join("a.lua")).unwrap();
        fs::write(dir.path().join("b.lua"), plugin_source("b", "https://b")).unwrap();
        registry.rebuild(&test_config(dir.path())).await.unwrap();

        // The held snapshot still routes the old binding.
        assert!(held.resolve("a").is_some());
        assert!(registry.snapshot().resolve("a").is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_by_first_binding() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.lua"), plugin_source("zz", "https://z")).unwrap();
        fs::write(dir.path().join("2.lua"), plugin_source("aa", "https://a")).unwrap();

        let registry = registry();
        registry.rebuild(&test_config(dir.path())).await.unwrap();

        let snapshot = registry.snapshot();
        let listed: Vec<&str> = snapshot
            .list()
            .iter()
            .map(|p| p.bindings()[0].as_str())
            .collect();
        assert_eq!(listed, vec!["aa", "zz"]);
    }

    #[tokio::test]
    async fn test_concurrent_process_calls() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c.lua"), plugin_source("c", "https://c")).unwrap();

        let registry = registry();
        registry.rebuild(&test_config(dir.path())).await.unwrap();
        let snapshot = registry.snapshot();
        let plugin = snapshot.resolve("c").unwrap().clone();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let plugin = plugin.clone();
            handles.push(tokio::spawn(async move { plugin.process("c").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "https://c");
        }
    }
}
