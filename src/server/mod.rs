// Bunnylol - HTTP Frontend
// Copyright (C) 2025 Bunnylol Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Loopback HTTP frontend.
//!
//! Three routes: `GET /?cmd=<query>` answers with a 302 redirect through the
//! resolver, `GET /` renders the bindings index, and `GET /reload` rebuilds
//! the registry. The listener binds to 127.0.0.1 only and additionally
//! refuses non-loopback peers.

pub mod web;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::BunnylolConfig;
use crate::core::events::{Event, EventSink, LogSink};
use crate::core::resolver::resolve_query;
use crate::plugins::PluginRegistry;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("server error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct AppState {
    registry: Arc<PluginRegistry>,
    config: Arc<RwLock<Arc<BunnylolConfig>>>,
    events: Arc<dyn EventSink>,
}

impl AppState {
    pub fn new(
        registry: Arc<PluginRegistry>,
        config: BunnylolConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            config: Arc::new(RwLock::new(Arc::new(config))),
            events,
        }
    }

    /// The config snapshot a request works against for its whole lifetime.
    fn config_snapshot(&self) -> Arc<BunnylolConfig> {
        self.config.read().unwrap().clone()
    }
}

#[derive(Debug, Deserialize)]
struct CmdQuery {
    cmd: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/reload", get(reload))
        .fallback(not_found)
        .layer(middleware::from_fn(loopback_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the frontend until shutdown. Blocks on the listener.
pub async fn run(config: BunnylolConfig, events: Arc<dyn EventSink>) -> Result<(), ServeError> {
    let registry = Arc::new(PluginRegistry::new(events.clone()));
    match registry.rebuild(&config).await {
        Ok(summary) => info!(
            "Loaded {} plugin(s) with {} binding(s)",
            summary.loaded, summary.bindings
        ),
        Err(e) => warn!("Initial plugin build failed: {}", e),
    }

    let port = config.server.port;
    let state = AppState::new(registry, config, events);
    let app = router(state);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(ServeError::Bind)?;
    info!("Bunnylol listening on http://127.0.0.1:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ServeError::Internal(anyhow::Error::new(e)))
}

/// Blocking entry point behind the C ABI `serve()` export.
///
/// Exit codes: 0 clean shutdown, 1 bind error, 2 config parse error,
/// 3 fatal internal error. `port == 0` uses the configured port.
pub fn serve_blocking(port: u16) -> i32 {
    let mut config = match BunnylolConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bunnylol: {}", e);
            return 2;
        }
    };
    if port != 0 {
        config.server.port = port;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("bunnylol: failed to start runtime: {}", e);
            return 3;
        }
    };

    match runtime.block_on(run(config, Arc::new(LogSink))) {
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

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Defense in depth: the listener is loopback-bound, but refuse any peer
/// that is somehow not local anyway.
async fn loopback_guard(request: Request, next: Next) -> Response {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        if !addr.ip().is_loopback() {
            return (StatusCode::FORBIDDEN, "loopback only\n").into_response();
        }
    }
    next.run(request).await
}

async fn root(State(state): State<AppState>, Query(params): Query<CmdQuery>) -> Response {
    let config = state.config_snapshot();
    let cmd = params.cmd.as_deref().map(str::trim).unwrap_or("");

    if cmd.is_empty() {
        let snapshot = state.registry.snapshot();
        return Html(web::render_bindings_page(&config, &snapshot)).into_response();
    }

    let started = Instant::now();
    let snapshot = state.registry.snapshot();
    let target = resolve_query(cmd, &snapshot, &config, state.events.as_ref()).await;
    state.events.emit(&Event::RequestTraced {
        query: cmd.to_string(),
        target: target.clone(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });

    redirect(&target)
}

fn redirect(target: &str) -> Response {
    let location = match HeaderValue::from_str(target) {
        Ok(location) => location,
        // A target that cannot be a header value (stray control bytes)
        // still must not surface an error page; send the index instead.
        Err(_) => HeaderValue::from_static("/"),
    };

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, location);
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}

async fn health() -> &'static str {
    "ok"
}

async fn reload(State(state): State<AppState>) -> impl IntoResponse {
    // Config is re-read first; a parse error keeps the previous config.
    match BunnylolConfig::load() {
        Ok(fresh) => {
            *state.config.write().unwrap() = Arc::new(fresh);
        }
        Err(e) => warn!("Config reload failed, keeping previous: {}", e),
    }

    let config = state.config_snapshot();
    let body = match state.registry.rebuild(&config).await {
        Ok(summary) => format!(
            "reloaded: {} plugin(s), {} binding(s), {} skipped\n",
            summary.loaded, summary.bindings, summary.skipped
        ),
        Err(e) => format!("reload failed, previous snapshot kept: {}\n", e),
    };
    (StatusCode::OK, body)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found\n")
}
