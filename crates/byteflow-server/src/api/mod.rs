pub mod config;
pub mod reports;

use axum::Router;

use byteflow_core::state::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/reports", reports::router())
        .nest("/api/config", config::router())
}
