//! # Bunnylol
//!
//! A local command router: a loopback HTTP server turns the browser address
//! bar into a command line. The first token of the `cmd` query parameter
//! selects a Lua plugin, the plugin turns the query into a URL, and the
//! server answers with a redirect.
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! bunnylol = { git = "https://github.com/bunnylol/bunnylol.git" }
//! tokio = { version = "1.35", features = ["full"] }
//! ```
//!
//! Basic usage:
//! ```no_run
//! use bunnylol::{BunnylolConfig, LogSink, PluginRegistry, resolve_query};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BunnylolConfig::default();
//!     let registry = PluginRegistry::new(Arc::new(LogSink));
//!     let _ = registry.rebuild(&config).await;
//!
//!     let url = resolve_query("gh facebook/react", &registry.snapshot(), &config, &LogSink).await;
//!     println!("{}", url);
//! }
//! ```
//!
//! ## Plugins
//!
//! A plugin is a single `.lua` file in `$XDG_DATA_HOME/bunnylol/commands/`
//! (or the system command directory) defining `info()` and
//! `process(full_args)`:
//!
//! ```lua
//! function info()
//!   return {
//!     bindings = { "gh", "github" },
//!     description = "Open GitHub or jump to a repository",
//!     example = "gh facebook/react",
//!   }
//! end
//!
//! function process(full_args)
//!   local args = get_args(full_args, "gh")
//!   if args == "" then
//!     return "https://github.com"
//!   end
//!   return "https://github.com/" .. url_encode_path(args)
//! end
//! ```
//!
//! Plugins run sandboxed: no filesystem, network, process, or environment
//! access; only the host API (`get_args`, `url_encode`, `url_encode_path`)
//! plus Lua's string and pattern library.

pub mod config;
pub mod core;
pub mod plugins;
pub mod server;

pub use config::BunnylolConfig;
pub use core::events::{Event, EventSink, LogSink};
pub use core::resolver::resolve_query;
pub use plugins::{Plugin, PluginRegistry, RegistrySnapshot};

/// Stable C ABI entry point for the native shell.
///
/// Blocks until the server shuts down. `port == 0` means "use the configured
/// port". Returns 0 on clean shutdown, 1 on bind error, 2 on a config parse
/// error, 3 on any other fatal error.
#[no_mangle]
pub extern "C" fn serve(port: u16) -> i32 {
    server::serve_blocking(port)
}
