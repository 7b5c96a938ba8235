//! Qwen adapter — DashScope cloud chat-completion API (OpenAI-compatible).
//!
//! POST {base_url}/chat/completions with a Bearer key; the answer arrives in
//! `choices[0].message.content`.

use async_trait::async_trait;

use crate::error::WorkflowError;

use super::{http_client, status_error, transport_error, CompletionRequest, ModelBackend};

pub struct QwenBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl QwenBackend {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: http_client(),
            base_url,
            api_key,
            model,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("DASHSCOPE_BASE_URL")
                .unwrap_or_else(|_| "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()),
            std::env::var("DASHSCOPE_API_KEY").ok(),
            std::env::var("QWEN_MODEL").unwrap_or_else(|_| "qwen-plus".to_string()),
        )
    }
}

/// Pull the answer text out of an OpenAI-compatible chat response.
fn extract_content(json: &serde_json::Value) -> Result<String, WorkflowError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");

    if content.trim().is_empty() {
        return Err(WorkflowError::ProviderResponse(
            "qwen: empty response content".to_string(),
        ));
    }
    Ok(content.to_string())
}

#[async_trait]
impl ModelBackend for QwenBackend {
    fn name(&self) -> &str {
        "qwen"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, WorkflowError> {
        request.validate()?;

        let api_key = self.api_key.as_deref().ok_or_else(|| {
            WorkflowError::ProviderAuth("qwen: DASHSCOPE_API_KEY is not set".to_string())
        })?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens
        });

        tracing::info!("[Qwen] Calling {} (model: {})", url, self.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("qwen", e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| transport_error("qwen", e))?;

        if !status.is_success() {
            return Err(status_error("qwen", status, &response_text));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| WorkflowError::ProviderResponse(format!("qwen: invalid JSON: {}", e)))?;

        extract_content(&json)
    }
}
