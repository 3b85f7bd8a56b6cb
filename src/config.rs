// Bunnylol - Configuration
// Copyright (C) 2025 Bunnylol Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration file handling and filesystem layout.
//!
//! The configuration lives at `$XDG_CONFIG_HOME/bunnylol/config.toml` and is
//! read once at startup and again on explicit reload. A missing file means
//! defaults; a malformed file is a hard error at startup and a no-op on
//! reload.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const APP_PREFIX: &str = "bunnylol";

pub const DEFAULT_PORT: u16 = 8085;
pub const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 200;

/// Maximum Lua execution contexts kept per plugin.
pub const CONTEXT_POOL_CAP: usize = 4;
/// How long a request waits for a free context before taking the fallback.
pub const CONTEXT_CHECKOUT_TIMEOUT_MS: u64 = 100;

/// Install prefixes probed for the system plugin directory
/// (`<prefix>/share/bunnylol/commands`).
const INSTALL_PREFIXES: &[&str] = &[
    "/opt/homebrew",
    "/usr/local",
    "/home/linuxbrew/.linuxbrew",
    "/usr",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BunnylolConfig {
    /// Fallback search engine when no binding matches.
    /// Options: "google" (default), "ddg", "bing", or "none" to disable.
    #[serde(default = "default_search_engine")]
    pub default_search: String,

    /// Where an empty query lands. Defaults to the bindings index at `/`.
    #[serde(default = "default_landing_url")]
    pub landing_url: String,

    /// Static command aliases, expanded once before binding lookup.
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    /// Extra plugin directories scanned after the user and system ones.
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,

    /// Wall-clock ceiling for a single plugin invocation.
    #[serde(default = "default_plugin_timeout_ms")]
    pub plugin_timeout_ms: u64,

    #[serde(default)]
    pub server: ServerConfig,

    /// Anything we don't recognize ends up here and gets a warning.
    #[serde(flatten)]
    pub unknown: HashMap<String, toml::Value>,
}

impl Default for BunnylolConfig {
    fn default() -> Self {
        Self {
            default_search: default_search_engine(),
            landing_url: default_landing_url(),
            aliases: HashMap::new(),
            plugin_dirs: Vec::new(),
            plugin_timeout_ms: default_plugin_timeout_ms(),
            server: ServerConfig::default(),
            unknown: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port on loopback.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public-facing URL shown on the bindings page. Bare domains get a
    /// scheme applied: local addresses -> http, everything else -> https.
    #[serde(default)]
    pub display_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            display_url: None,
        }
    }
}

impl ServerConfig {
    pub fn display_url(&self) -> String {
        match &self.display_url {
            Some(url) => {
                let url = url.trim();
                if url.starts_with("http://") || url.starts_with("https://") {
                    url.to_string()
                } else if url.starts_with("localhost")
                    || url.starts_with("127.0.0.1")
                    || url.starts_with("0.0.0.0")
                {
                    format!("http://{}", url)
                } else {
                    format!("https://{}", url)
                }
            }
            None => format!("http://localhost:{}", self.port),
        }
    }
}

fn default_search_engine() -> String {
    "google".to_string()
}

fn default_landing_url() -> String {
    "/".to_string()
}

fn default_plugin_timeout_ms() -> u64 {
    DEFAULT_PLUGIN_TIMEOUT_MS
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl BunnylolConfig {
    /// Path of the config file: `$XDG_CONFIG_HOME/bunnylol/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        let xdg = xdg::BaseDirectories::with_prefix(APP_PREFIX);
        xdg.get_config_home().map(|dir| dir.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults if no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.warn_unknown_keys();
        Ok(config)
    }

    fn warn_unknown_keys(&self) {
        for key in self.unknown.keys() {
            warn!("Ignoring unknown config key '{}'", key);
        }
    }

    /// User plugin directory: `$XDG_DATA_HOME/bunnylol/commands`.
    pub fn user_plugin_dir() -> Option<PathBuf> {
        let xdg = xdg::BaseDirectories::with_prefix(APP_PREFIX);
        let path = xdg.get_data_home()?.join("commands");
        if !path.exists() {
            fs::create_dir_all(&path).ok()?;
        }
        Some(path)
    }

    /// System plugin directories under detected install prefixes.
    pub fn system_plugin_dirs() -> Vec<PathBuf> {
        INSTALL_PREFIXES
            .iter()
            .map(|prefix| {
                PathBuf::from(prefix)
                    .join("share")
                    .join(APP_PREFIX)
                    .join("commands")
            })
            .filter(|dir| dir.is_dir())
            .collect()
    }

    /// All plugin directories in priority order: user, system, then the
    /// extras from the config file. Directories that do not exist are
    /// dropped.
    pub fn discovery_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(user) = Self::user_plugin_dir() {
            dirs.push(user);
        }
        dirs.extend(Self::system_plugin_dirs());
        dirs.extend(self.plugin_dirs.iter().filter(|dir| dir.is_dir()).cloned());
        dirs
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    /// Fallback search URL for an unrecognized command, or `None` when the
    /// fallback is disabled.
    pub fn search_url(&self, query: &str) -> Option<String> {
        let encoded = crate::plugins::api::url_encode(query);
        match self.default_search.as_str() {
            "none" | "" => None,
            "ddg" | "duckduckgo" => Some(format!("https://duckduckgo.com/?q={}", encoded)),
            "bing" => Some(format!("https://www.bing.com/search?q={}", encoded)),
            _ => Some(format!("https://www.google.com/search?q={}", encoded)),
        }
    }
}
