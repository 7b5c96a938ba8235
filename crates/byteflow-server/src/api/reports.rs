//! Report task endpoints: submit, list, status, cancel.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use byteflow_core::state::AppState;
use byteflow_core::task::RunOptions;
use byteflow_core::WorkflowError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reports).post(submit_report))
        .route("/{id}", get(get_report))
        .route("/{id}/cancel", post(cancel_report))
}

#[derive(Debug, Deserialize)]
struct SubmitReportRequest {
    topic: String,
    word_limit: Option<u32>,
    report_type: Option<String>,
    /// Augment search-enabled roles via the default (Baidu) backend
    #[serde(default)]
    use_search_api: bool,
    /// Augment via the alternate (Zhipu) backend instead
    #[serde(default)]
    use_alt_search: bool,
    /// Override every role's provider binding for this run
    model_provider: Option<String>,
    /// Request-scoped search API key. Forwarded to the search backend only;
    /// never stored beyond the task, never echoed back.
    api_key: Option<String>,
    /// Progress-channel client to stream updates to
    client_id: Option<String>,
}

impl SubmitReportRequest {
    fn into_options(self) -> (String, String, RunOptions) {
        let defaults = RunOptions::default();
        let use_search = self.use_search_api || self.use_alt_search;
        let search_provider = if self.use_alt_search {
            Some("zhipu".to_string())
        } else if self.use_search_api {
            Some("baidu".to_string())
        } else {
            None
        };

        let options = RunOptions {
            use_search,
            search_provider,
            model_provider: self.model_provider,
            api_key: self.api_key,
            word_limit: self.word_limit.unwrap_or(defaults.word_limit),
            report_type: self.report_type.unwrap_or(defaults.report_type),
        };

        let client_id = self
            .client_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        (self.topic, client_id, options)
    }
}

/// POST /api/reports — validate, register and start a report task.
async fn submit_report(
    State(state): State<AppState>,
    Json(body): Json<SubmitReportRequest>,
) -> Result<Json<serde_json::Value>, WorkflowError> {
    let (topic, client_id, options) = body.into_options();
    let task_id = state.engine.submit(&client_id, &topic, options).await?;
    Ok(Json(serde_json::json!({ "task_id": task_id })))
}

/// GET /api/reports — snapshots of all known tasks, newest first.
async fn list_reports(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, WorkflowError> {
    let tasks = state.tasks.snapshots().await;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

/// GET /api/reports/{id} — current state of one task.
async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, WorkflowError> {
    let task = state
        .tasks
        .snapshot(&id)
        .await
        .ok_or_else(|| WorkflowError::NotFound(format!("Task {} not found", id)))?;
    Ok(Json(serde_json::json!({ "task": task })))
}

/// POST /api/reports/{id}/cancel — request cooperative cancellation.
async fn cancel_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, WorkflowError> {
    let status = state.tasks.cancel(&id).await?;
    Ok(Json(serde_json::json!({
        "task_id": id,
        "status": status,
    })))
}
