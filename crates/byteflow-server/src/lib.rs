//! ByteFlow Server - Multi-agent Report Pipeline Backend
//!
//! A standalone Rust backend server for ByteFlow, providing:
//! - RESTful HTTP API via axum (submit, query, cancel report tasks)
//! - WebSocket progress channel for live per-client updates
//! - Optional static frontend serving
//!
//! This crate can be used standalone or embedded in other applications.

pub mod api;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use byteflow_core::state::{AppState, AppStateInner};

/// How often the background sweeper evicts expired terminal tasks.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the ByteFlow backend server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Optional path to a pipeline YAML. Falls back to the built-in
    /// six-role pipeline when unset.
    pub pipeline_path: Option<String>,
    /// Optional path to static frontend files.
    /// When set, the server serves these files for all non-API routes.
    pub static_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            pipeline_path: None,
            static_dir: None,
        }
    }
}

/// Create a shared `AppState` from an optional pipeline file.
///
/// This is useful when you need to share the state between the HTTP server
/// and other consumers (e.g. a CLI runner driving the engine directly).
pub fn create_app_state(pipeline_path: Option<&str>) -> Result<AppState, String> {
    let inner = AppStateInner::from_pipeline(pipeline_path)
        .map_err(|e| format!("Failed to load pipeline: {}", e))?;
    Ok(Arc::new(inner))
}

/// Start the backend server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "byteflow_core=info,byteflow_server=info,tower_http=info".into()
            }),
        )
        .init();

    tracing::info!(
        "Starting ByteFlow backend server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(config.pipeline_path.as_deref())?;

    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
///
/// This variant is useful when you want to share the state with other
/// consumers, or inject stub registries in tests.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    state.tasks.spawn_sweeper(SWEEP_INTERVAL);

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .merge(api::api_router())
        .route("/ws/{client_id}", axum::routing::get(ws::handler))
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Serve static frontend files if configured
    if let Some(ref static_dir) = config.static_dir {
        let static_path = std::path::Path::new(static_dir);
        if static_path.exists() && static_path.is_dir() {
            tracing::info!("Serving static frontend from: {}", static_dir);
            let serve_dir = tower_http::services::ServeDir::new(static_dir)
                .not_found_service(tower_http::services::ServeFile::new(
                    static_path.join("index.html"),
                ));
            app = app.fallback_service(serve_dir);
        } else {
            tracing::warn!(
                "Static directory not found: {}. Frontend won't be served.",
                static_dir
            );
        }
    }

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("ByteFlow backend server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "byteflow-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
