// Bunnylol - Server Binary
// Copyright (C) 2025 Bunnylol Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

use bunnylol::config::ConfigError;
use bunnylol::server::ServeError;
use bunnylol::{resolve_query, BunnylolConfig, LogSink, PluginRegistry};

#[derive(Parser)]
#[command(name = "bunnylol")]
#[command(version)]
#[command(about = "Local command router - URL shortcuts for your browser's address bar")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable trace output (extremely verbose)
    #[arg(long, global = true)]
    trace: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bunnylol server (default)
    Serve {
        /// Port to bind on loopback (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Resolve a query and print the URL without serving
    Resolve {
        /// The query, e.g. `bunnylol resolve gh facebook/react`
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,
    },

    /// List all active command bindings
    Bindings,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.trace {
        Level::TRACE
    } else if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let exit_code = match cli.command {
        None => serve(None).await,
        Some(Commands::Serve { port }) => serve(port).await,
        Some(Commands::Resolve { query }) => resolve_once(&query.join(" ")).await,
        Some(Commands::Bindings) => print_bindings().await,
    };

    std::process::exit(exit_code);
}

fn load_config_or_exit_code() -> Result<BunnylolConfig, i32> {
    match BunnylolConfig::load() {
        Ok(config) => Ok(config),
        Err(e @ ConfigError::Parse { .. }) => {
            eprintln!("bunnylol: {}", e);
            Err(2)
        }
        Err(e) => {
            eprintln!("bunnylol: {}", e);
            Err(3)
        }
    }
}

async fn serve(port: Option<u16>) -> i32 {
    let mut config = match load_config_or_exit_code() {
        Ok(config) => config,
        Err(code) => return code,
    };
    if let Some(port) = port {
        config.server.port = port;
    }

    match bunnylol::server::run(config, Arc::new(LogSink)).await {
        Ok(()) => 0,
        Err(ServeError::Bind(e)) => {
            eprintln!("bunnylol: {}", e);
            1
        }
        Err(ServeError::Internal(e)) => {
            eprintln!("bunnylol: {}", e);
            3
        }
    }
}

async fn resolve_once(query: &str) -> i32 {
    let config = match load_config_or_exit_code() {
        Ok(config) => config,
        Err(code) => return code,
    };

    let registry = PluginRegistry::new(Arc::new(LogSink));
    if let Err(e) = registry.rebuild(&config).await {
        eprintln!("bunnylol: {}", e);
        return 3;
    }

    let url = resolve_query(query, &registry.snapshot(), &config, &LogSink).await;
    println!("{}", url);
    0
}

async fn print_bindings() -> i32 {
    let config = match load_config_or_exit_code() {
        Ok(config) => config,
        Err(code) => return code,
    };

    let registry = PluginRegistry::new(Arc::new(LogSink));
    if let Err(e) = registry.rebuild(&config).await {
        eprintln!("bunnylol: {}", e);
        return 3;
    }

    let snapshot = registry.snapshot();
    for plugin in snapshot.list() {
        println!(
            "{:<16} {:<44} {}",
            plugin.bindings().join(", "),
            plugin.description(),
            plugin.example()
        );
    }
    0
}
