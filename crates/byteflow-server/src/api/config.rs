//! Runtime configuration introspection.
//!
//! Reports which credentials are present so a frontend can enable or grey
//! out provider and search options. Key *presence* only; key material never
//! leaves the process.

use axum::{extract::State, routing::get, Json, Router};

use byteflow_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_config))
}

async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "pipeline": {
            "name": state.roles.pipeline_name(),
            "roles": state.roles.len(),
        },
        "providers": {
            "available": state.providers.names(),
            "dashscope_key_present": std::env::var("DASHSCOPE_API_KEY").is_ok(),
            "baidu_key_present": std::env::var("BAIDU_API_KEY").is_ok(),
        },
        "search": {
            "available": state.search.names(),
            "baidu_key_present": std::env::var("BAIDU_API_KEY").is_ok(),
            "zhipu_key_present": std::env::var("ZHIPU_API_KEY").is_ok(),
        },
    }))
}
