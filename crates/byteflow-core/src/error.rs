//! Core error type for the ByteFlow pipeline.
//!
//! `WorkflowError` is used throughout the core domain (registries, adapters,
//! engine). When the `axum` feature is enabled, it also implements
//! `IntoResponse` so it can be used directly as an axum handler error type.

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Bad pipeline definition — fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    /// Bad task submission — rejected before any task is created.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad or missing provider credential — fatal for the step, never retried.
    #[error("Provider auth error: {0}")]
    ProviderAuth(String),

    /// Network failure or timeout reaching a provider — retryable.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Malformed or empty provider response — retryable.
    #[error("Provider response error: {0}")]
    ProviderResponse(String),

    /// Search backend failure — non-fatal, the pipeline degrades gracefully.
    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    /// Cancellation requested by the user — a normal terminal state.
    #[error("Cancelled by user")]
    Cancelled,
}

impl WorkflowError {
    /// Whether a bounded retry is worth attempting for this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkflowError::ProviderUnavailable(_)
                | WorkflowError::ProviderResponse(_)
                | WorkflowError::SearchUnavailable(_)
        )
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for WorkflowError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            WorkflowError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WorkflowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::ProviderAuth(_) => StatusCode::BAD_GATEWAY,
            WorkflowError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::ProviderResponse(_) => StatusCode::BAD_GATEWAY,
            WorkflowError::SearchUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::Cancelled => StatusCode::CONFLICT,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
