//! Security sandbox for plugin execution.
//!
//! Every plugin runs in its own Lua state with the dangerous standard
//! library surfaces stripped before any plugin source is loaded, a memory
//! cap, and a wall-clock deadline enforced through an instruction hook.

use mlua::{HookTriggers, Lua, Value, VmState};
use std::time::{Duration, Instant};

/// Memory cap per execution context.
const MEMORY_LIMIT_BYTES: usize = 10_000_000;

/// How often the deadline hook fires, in VM instructions.
const HOOK_GRANULARITY: u32 = 2048;

/// Marker planted in the Lua error chain when the deadline trips.
pub const DEADLINE_MARKER: &str = "execution deadline exceeded";

/// Create a sandboxed Lua state with the host API registered.
///
/// Removed before plugin code runs: `os`, `io`, `load`, `loadfile`,
/// `dofile`, `require`, `package`, `debug`. `print` is rebound to a logger
/// so stray debug output lands in the event stream instead of stdout.
pub fn sandboxed_lua() -> mlua::Result<Lua> {
    let lua = Lua::new();

    {
        let globals = lua.globals();
        globals.set("os", Value::Nil)?;
        globals.set("io", Value::Nil)?;
        globals.set("load", Value::Nil)?;
        globals.set("loadfile", Value::Nil)?;
        globals.set("dofile", Value::Nil)?;
        globals.set("require", Value::Nil)?;
        globals.set("package", Value::Nil)?;
        globals.set("debug", Value::Nil)?;

        let log = lua.create_function(|_, msg: String| {
            tracing::info!(target: "plugin", "{}", msg);
            Ok(())
        })?;
        globals.set("print", log)?;
    }

    lua.set_memory_limit(MEMORY_LIMIT_BYTES)?;

    super::api::register_host_api(&lua)?;

    Ok(lua)
}

/// Run `f` against `lua` under a wall-clock deadline.
///
/// The hook raises a Lua error carrying [`DEADLINE_MARKER`] once the
/// deadline passes; the hook is removed before returning either way.
pub fn with_deadline<T>(
    lua: &Lua,
    timeout: Duration,
    f: impl FnOnce() -> mlua::Result<T>,
) -> mlua::Result<T> {
    let deadline = Instant::now() + timeout;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_GRANULARITY),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                return Err(mlua::Error::runtime(DEADLINE_MARKER));
            }
            Ok(VmState::Continue)
        },
    );

    let result = f();
    lua.remove_hook();
    result
}

/// Whether a Lua error was raised by the deadline hook.
pub fn is_deadline_error(err: &mlua::Error) -> bool {
    err.to_string().contains(DEADLINE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_blocks_dangerous_libs() {
        let lua = sandboxed_lua().unwrap();

        assert!(lua.globals().get::<Value>("os").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("io").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("load").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("loadfile").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("dofile").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("require").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("package").unwrap().is_nil());
        assert!(lua.globals().get::<Value>("debug").unwrap().is_nil());
    }

    #[test]
    fn test_sandbox_exposes_host_api() {
        let lua = sandboxed_lua().unwrap();

        assert!(lua.globals().get::<Value>("get_args").unwrap().is_function());
        assert!(lua.globals().get::<Value>("url_encode").unwrap().is_function());
        assert!(lua
            .globals()
            .get::<Value>("url_encode_path")
            .unwrap()
            .is_function());
        // The Lua pattern library stays available for plugins like jira.
        assert!(!lua.globals().get::<Value>("string").unwrap().is_nil());
    }

    #[test]
    fn test_deadline_trips_on_busy_loop() {
        let lua = sandboxed_lua().unwrap();
        let err = with_deadline(&lua, Duration::from_millis(20), || {
            lua.load("while true do end").exec()
        })
        .unwrap_err();
        assert!(is_deadline_error(&err));
    }

    #[test]
    fn test_deadline_leaves_fast_code_alone() {
        let lua = sandboxed_lua().unwrap();
        let result: i64 = with_deadline(&lua, Duration::from_millis(200), || {
            lua.load("return 40 + 2").eval()
        })
        .unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_memory_limit_is_enforced() {
        let lua = sandboxed_lua().unwrap();
        let err = lua
            .load("local t = {} for i = 1, 1e9 do t[i] = string.rep('x', 128) end")
            .exec()
            .unwrap_err();
        assert!(matches!(err, mlua::Error::MemoryError(_)));
    }
}
