//! Maps a raw query string to a destination URL.
//!
//! The resolver never fails toward the browser: every plugin-side problem is
//! reported through the event sink and converted into the configured search
//! fallback (or the bindings index when the fallback is disabled).

use tracing::debug;

use crate::config::BunnylolConfig;
use crate::core::events::{Event, EventSink};
use crate::core::query;
use crate::plugins::{PluginError, RegistrySnapshot};

/// Resolve a raw (already URL-decoded) query to a redirect target.
///
/// The target is either an absolute URL or a server-relative path starting
/// with `/`.
pub async fn resolve_query(
    raw: &str,
    snapshot: &RegistrySnapshot,
    config: &BunnylolConfig,
    events: &dyn EventSink,
) -> String {
    let q = raw.trim_matches(|c: char| c.is_ascii_whitespace());
    if q.is_empty() {
        return config.landing_url.clone();
    }

    // Alias expansion runs at most once; an expansion that begins with
    // another alias is looked up as a binding, not re-expanded.
    let (token, tail) = query::split_command(q);
    let mut binding = token.to_lowercase();
    let expanded;
    let q = match config.aliases.get(&binding) {
        Some(expansion) => {
            expanded = if tail.is_empty() {
                expansion.clone()
            } else {
                format!("{} {}", expansion, tail)
            };
            binding = query::command(&expanded).to_lowercase();
            debug!("Alias '{}' expanded to '{}'", token, expanded);
            expanded.as_str()
        }
        None => q,
    };

    let plugin = match snapshot.resolve(&binding) {
        Some(plugin) => plugin,
        None => return fallback(q, config),
    };

    let outcome = match plugin.process(q).await {
        Ok(target) => match validate_target(&target) {
            Ok(()) => Ok(target),
            Err(detail) => Err(PluginError::BadOutput {
                path: plugin.path().to_path_buf(),
                message: format!("{}: {}", target, detail),
            }),
        },
        Err(e) => Err(e),
    };

    match outcome {
        Ok(target) => target,
        Err(e) => {
            events.emit(&Event::ResolveError {
                query: q.to_string(),
                kind: e.kind(),
                detail: e.to_string(),
            });
            fallback(q, config)
        }
    }
}

/// A redirect target must be an absolute URL (scheme + host) or
/// server-relative.
fn validate_target(target: &str) -> Result<(), String> {
    if target.starts_with('/') {
        return Ok(());
    }
    match url::Url::parse(target) {
        Ok(parsed) if parsed.has_host() => Ok(()),
        Ok(_) => Err("URL has no host".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn fallback(q: &str, config: &BunnylolConfig) -> String {
    config
        .search_url(q)
        .unwrap_or_else(|| config.landing_url.clone())
}
