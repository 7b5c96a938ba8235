//! Ollama adapter — locally hosted model server.
//!
//! POST {base_url}/api/chat with `stream: false`; the answer arrives in
//! `message.content`. Local reasoning models (e.g. deepseek-r1) embed their
//! chain of thought in `<think>` blocks inside the content, which this
//! adapter strips before returning.

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::text;

use super::{http_client, status_error, transport_error, CompletionRequest, ModelBackend};

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: http_client(),
            base_url,
            model,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "deepseek-r1:32b".to_string()),
        )
    }
}

/// Pull the answer text out of an Ollama chat response.
fn extract_content(json: &serde_json::Value) -> Result<String, WorkflowError> {
    let content = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");

    let answer = text::clean_response(content);
    if answer.trim().is_empty() {
        return Err(WorkflowError::ProviderResponse(
            "ollama: empty response content".to_string(),
        ));
    }
    Ok(answer)
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, WorkflowError> {
        request.validate()?;

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens
            }
        });

        tracing::info!("[Ollama] Calling {} (model: {})", url, self.model);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        if !status.is_success() {
            return Err(status_error("ollama", status, &response_text));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text).map_err(|e| {
            WorkflowError::ProviderResponse(format!("ollama: invalid JSON: {}", e))
        })?;

        extract_content(&json)
    }
}
