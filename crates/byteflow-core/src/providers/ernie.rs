//! ERNIE adapter — Baidu Qianfan API, with an additional retrieval-augmented
//! mode.
//!
//! Plain completions go to `/v2/chat/completions`; when retrieval mode is
//! enabled the call goes to `/v2/ai_search/chat/completions` with
//! `search_source: baidu_search_v2`, letting the vendor fold live search
//! results into the generation. Responses may carry a separate
//! `reasoning_content` field next to `content`; only `content` is returned.

use async_trait::async_trait;

use crate::error::WorkflowError;

use super::{http_client, status_error, transport_error, CompletionRequest, ModelBackend};

const QIANFAN_BASE_URL: &str = "https://qianfan.baidubce.com";

pub struct ErnieBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    /// When true, completions run through the vendor's AI-search endpoint.
    retrieval_mode: bool,
}

impl ErnieBackend {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        retrieval_mode: bool,
    ) -> Self {
        Self {
            client: http_client(),
            base_url,
            api_key,
            model,
            retrieval_mode,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("QIANFAN_BASE_URL").unwrap_or_else(|_| QIANFAN_BASE_URL.to_string()),
            std::env::var("BAIDU_API_KEY").ok(),
            std::env::var("ERNIE_MODEL").unwrap_or_else(|_| "ernie-4.5-turbo-128k".to_string()),
            std::env::var("ERNIE_RETRIEVAL_MODE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        )
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.retrieval_mode {
            format!("{}/v2/ai_search/chat/completions", base)
        } else {
            format!("{}/v2/chat/completions", base)
        }
    }
}

/// Pull the answer text out of a Qianfan response, ignoring any
/// `reasoning_content` scratch payload.
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
            "ernie: empty response content".to_string(),
        ));
    }
    Ok(content.to_string())
}

#[async_trait]
impl ModelBackend for ErnieBackend {
    fn name(&self) -> &str {
        "ernie"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, WorkflowError> {
        request.validate()?;

        let api_key = self.api_key.as_deref().ok_or_else(|| {
            WorkflowError::ProviderAuth("ernie: BAIDU_API_KEY is not set".to_string())
        })?;

        let url = self.endpoint();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens
        });

        if self.retrieval_mode {
            body["search_source"] = serde_json::Value::String("baidu_search_v2".to_string());
        }

        tracing::info!(
            "[Ernie] Calling {} (model: {}, retrieval: {})",
            url,
            self.model,
            self.retrieval_mode
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("ernie", e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| transport_error("ernie", e))?;

        if !status.is_success() {
            return Err(status_error("ernie", status, &response_text));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| WorkflowError::ProviderResponse(format!("ernie: invalid JSON: {}", e)))?;

        extract_content(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_content_is_ignored() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "reasoning_content": "internal scratch work the user must never see",
                    "content": "The sector shows resilient demand."
                }
            }]
        });
        assert_eq!(
            extract_content(&json).unwrap(),
            "The sector shows resilient demand."
        );
    }

    #[test]
    fn empty_content_is_response_error() {
        let json = serde_json::json!({
            "choices": [{ "message": { "reasoning_content": "only scratch", "content": "" } }]
        });
        assert!(matches!(
            extract_content(&json).unwrap_err(),
            WorkflowError::ProviderResponse(_)
        ));
    }

    #[test]
    fn retrieval_mode_switches_endpoint() {
        let plain = ErnieBackend::new(
            QIANFAN_BASE_URL.to_string(),
            None,
            "ernie-4.5-turbo-128k".to_string(),
            false,
        );
        assert_eq!(
            plain.endpoint(),
            "https://qianfan.baidubce.com/v2/chat/completions"
        );

        let retrieval = ErnieBackend::new(
            QIANFAN_BASE_URL.to_string(),
            None,
            "ernie-4.5-turbo-128k".to_string(),
            true,
        );
        assert_eq!(
            retrieval.endpoint(),
            "https://qianfan.baidubce.com/v2/ai_search/chat/completions"
        );
    }
}
