//! Plugin discovery and loading.
//!
//! Discovery walks the configured command directories recursively and
//! collects `.lua` files. Loading executes a candidate inside a fresh
//! sandboxed state, verifies the `info`/`process` contract, and pulls the
//! declared metadata out of `info()`.

use mlua::{Function, Lua, Table, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::sandbox::{is_deadline_error, sandboxed_lua, with_deadline};
use super::PluginError;

/// Metadata and source of a successfully loaded plugin file.
#[derive(Debug, Clone)]
pub struct PluginSpec {
    pub path: PathBuf,
    pub bindings: Vec<String>,
    pub description: String,
    pub example: String,
    pub source: String,
}

/// Enumerate plugin candidates under `dirs`, in deterministic order.
///
/// Directories are walked recursively, following symlinks; candidates are
/// regular files with a `.lua` extension. The result is sorted
/// lexicographically by absolute path, with the directory's position in
/// `dirs` (user before system before extras) as the stable tie-break.
pub fn discover(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates: Vec<(PathBuf, usize)> = Vec::new();
    for (rank, dir) in dirs.iter().enumerate() {
        collect_lua_files(dir, rank, &mut candidates);
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    candidates.dedup_by(|a, b| a.0 == b.0);
    candidates.into_iter().map(|(path, _)| path).collect()
}

fn collect_lua_files(dir: &Path, rank: usize, out: &mut Vec<(PathBuf, usize)>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping unreadable plugin directory {:?}: {}", dir, e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_lua_files(&path, rank, out);
        } else if path.is_file() && path.extension().is_some_and(|ext| ext == "lua") {
            let absolute = path.canonicalize().unwrap_or(path);
            out.push((absolute, rank));
        }
    }
}

/// Build a fresh execution context for `source` and run the chunk in it.
pub fn create_context(source: &str, path: &Path, timeout: Duration) -> Result<Lua, PluginError> {
    let lua = sandboxed_lua().map_err(|e| PluginError::Internal(e.to_string()))?;

    with_deadline(&lua, timeout, || {
        lua.load(source).set_name(path.to_string_lossy()).exec()
    })
    .map_err(|e| classify_load(path, timeout, e))?;

    Ok(lua)
}

/// Load a plugin file: execute it, verify the contract, read `info()`.
///
/// Returns the metadata together with the warm context so the registry can
/// seed the plugin's pool with it.
pub fn load_plugin(path: &Path, timeout: Duration) -> Result<(PluginSpec, Lua), PluginError> {
    let source = fs::read_to_string(path).map_err(|e| PluginError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let lua = create_context(&source, path, timeout)?;

    // Both entry points must exist as callables before we trust info().
    if lua.globals().get::<Function>("info").is_err() {
        return Err(PluginError::Load {
            path: path.to_path_buf(),
            message: "plugin does not define an info() function".to_string(),
        });
    }
    if lua.globals().get::<Function>("process").is_err() {
        return Err(PluginError::Load {
            path: path.to_path_buf(),
            message: "plugin does not define a process(full_args) function".to_string(),
        });
    }

    let metadata = read_info(&lua, path, timeout)?;

    let spec = PluginSpec {
        path: path.to_path_buf(),
        bindings: metadata.0,
        description: metadata.1,
        example: metadata.2,
        source,
    };
    Ok((spec, lua))
}

fn read_info(
    lua: &Lua,
    path: &Path,
    timeout: Duration,
) -> Result<(Vec<String>, String, String), PluginError> {
    let info_err = |message: String| PluginError::Info {
        path: path.to_path_buf(),
        message,
    };

    let info_fn: Function = lua
        .globals()
        .get("info")
        .map_err(|e| info_err(e.to_string()))?;

    let table: Table = with_deadline(lua, timeout, || info_fn.call(()))
        .map_err(|e| classify_info(path, timeout, e))?;

    let bindings_table: Table = table
        .get("bindings")
        .map_err(|_| info_err("info().bindings must be a sequence of strings".to_string()))?;
    let raw_bindings: Vec<String> = bindings_table
        .sequence_values::<String>()
        .collect::<mlua::Result<_>>()
        .map_err(|_| info_err("info().bindings must contain only strings".to_string()))?;

    let mut bindings: Vec<String> = Vec::new();
    for binding in raw_bindings {
        if binding.trim().is_empty() {
            return Err(info_err("info().bindings entries must be non-empty".to_string()));
        }
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }
    if bindings.is_empty() {
        return Err(info_err("info() declared no bindings".to_string()));
    }

    let description: String = table
        .get("description")
        .map_err(|_| info_err("info().description must be a string".to_string()))?;
    let example: String = table
        .get("example")
        .map_err(|_| info_err("info().example must be a string".to_string()))?;

    Ok((bindings, description, example))
}

/// Invoke `process(query)` in `lua` and demand a string result.
pub fn invoke_process(
    lua: &Lua,
    path: &Path,
    query: &str,
    timeout: Duration,
) -> Result<String, PluginError> {
    let process: Function = lua.globals().get("process").map_err(|e| PluginError::Process {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let result: Value = with_deadline(lua, timeout, || process.call(query))
        .map_err(|e| classify_process(path, timeout, e))?;

    match result {
        Value::String(s) => Ok(s.to_string_lossy()),
        other => Err(PluginError::Process {
            path: path.to_path_buf(),
            message: format!("process() returned {} instead of a string", other.type_name()),
        }),
    }
}

fn classify_load(path: &Path, timeout: Duration, err: mlua::Error) -> PluginError {
    if matches!(err, mlua::Error::MemoryError(_)) {
        return PluginError::Resource {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
    }
    if is_deadline_error(&err) {
        return PluginError::Resource {
            path: path.to_path_buf(),
            message: format!("load exceeded {}ms", timeout.as_millis()),
        };
    }
    PluginError::Load {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn classify_info(path: &Path, timeout: Duration, err: mlua::Error) -> PluginError {
    if is_deadline_error(&err) {
        return PluginError::Timeout {
            path: path.to_path_buf(),
            timeout_ms: timeout.as_millis() as u64,
        };
    }
    PluginError::Info {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn classify_process(path: &Path, timeout: Duration, err: mlua::Error) -> PluginError {
    if is_deadline_error(&err) {
        return PluginError::Timeout {
            path: path.to_path_buf(),
            timeout_ms: timeout.as_millis() as u64,
        };
    }
    if matches!(err, mlua::Error::MemoryError(_)) {
        return PluginError::Resource {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
    }
    PluginError::Process {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn write_plugin(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(source.as_bytes()).unwrap();
        path
    }

    const VALID: &str = r#"
function info()
  return { bindings = { "t", "test" }, description = "test plugin", example = "t foo" }
end

function process(full_args)
  return "https://example.com/" .. url_encode_path(get_args(full_args, "t"))
end
"#;

    #[test]
    fn test_load_valid_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(dir.path(), "t.lua", VALID);

        let (spec, _lua) = load_plugin(&path, TIMEOUT).unwrap();
        assert_eq!(spec.bindings, vec!["t", "test"]);
        assert_eq!(spec.description, "test plugin");
        assert_eq!(spec.example, "t foo");
    }

    #[test]
    fn test_invoke_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(dir.path(), "t.lua", VALID);

        let (_spec, lua) = load_plugin(&path, TIMEOUT).unwrap();
        let url = invoke_process(&lua, &path, "t a b", TIMEOUT).unwrap();
        assert_eq!(url, "https://example.com/a%20b");
    }

    #[test]
    fn test_reject_missing_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(
            dir.path(),
            "p.lua",
            r#"function info() return { bindings = { "p" }, description = "", example = "" } end"#,
        );

        let err = load_plugin(&path, TIMEOUT).unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
    }

    #[test]
    fn test_reject_missing_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(dir.path(), "p.lua", "function process(q) return q end");

        let err = load_plugin(&path, TIMEOUT).unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
    }

    #[test]
    fn test_reject_empty_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(
            dir.path(),
            "p.lua",
            r#"
function info() return { bindings = {}, description = "", example = "" } end
function process(q) return "/x" end
"#,
        );

        let err = load_plugin(&path, TIMEOUT).unwrap_err();
        assert!(matches!(err, PluginError::Info { .. }));
    }

    #[test]
    fn test_reject_mistyped_description() {
        let dir = tempfile::tempdir().unwrap();
        // Lua numbers coerce to strings, so a table is what forces a mismatch.
        let path = write_plugin(
            dir.path(),
            "q.lua",
            r#"
function info() return { bindings = { "q" }, description = {}, example = "" } end
function process(q) return "/x" end
"#,
        );

        let err = load_plugin(&path, TIMEOUT).unwrap_err();
        assert!(matches!(err, PluginError::Info { .. }));
    }

    #[test]
    fn test_reject_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(dir.path(), "bad.lua", "function info( return end");

        let err = load_plugin(&path, TIMEOUT).unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
    }

    #[test]
    fn test_process_non_string_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(
            dir.path(),
            "p.lua",
            r#"
function info() return { bindings = { "p" }, description = "", example = "" } end
function process(q) return { q } end
"#,
        );

        let (_spec, lua) = load_plugin(&path, TIMEOUT).unwrap();
        let err = invoke_process(&lua, &path, "p", TIMEOUT).unwrap_err();
        assert!(matches!(err, PluginError::Process { .. }));
    }

    #[test]
    fn test_process_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(
            dir.path(),
            "spin.lua",
            r#"
function info() return { bindings = { "spin" }, description = "", example = "" } end
function process(q) while true do end end
"#,
        );

        let (_spec, lua) = load_plugin(&path, TIMEOUT).unwrap();
        let err = invoke_process(&lua, &path, "spin", Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, PluginError::Timeout { .. }));
    }

    #[test]
    fn test_discover_sorts_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write_plugin(dir.path(), "b.lua", VALID);
        write_plugin(&dir.path().join("sub"), "a.lua", VALID);
        write_plugin(dir.path(), "notes.txt", "not a plugin");

        let found = discover(&[dir.path().to_path_buf()]);
        assert_eq!(found.len(), 2);
        assert!(found[0] < found[1]);
        assert!(found.iter().all(|p| p.extension().unwrap() == "lua"));
    }
}
