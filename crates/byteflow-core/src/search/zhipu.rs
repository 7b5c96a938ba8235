//! Zhipu search backend — managed web-search retrieval.
//!
//! POST to the web-search tool endpoint; the provider streams result chunks
//! into the response body, which arrive here as per-chunk `search_result`
//! arrays that must be buffered and flattened into one ordered list.

use async_trait::async_trait;

use crate::error::WorkflowError;

use super::{SearchBackend, SearchResult, MAX_RESULTS};

const ZHIPU_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

pub struct ZhipuSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ZhipuSearch {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("ZHIPU_BASE_URL").unwrap_or_else(|_| ZHIPU_BASE_URL.to_string()),
            std::env::var("ZHIPU_API_KEY").ok(),
        )
    }
}

/// Flatten every `search_result` chunk in the response into one list,
/// preserving arrival order.
fn flatten_results(json: &serde_json::Value, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    let chunks = json
        .get("choices")
        .and_then(|c| c.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|choice| choice.get("message"))
                .filter_map(|msg| msg.get("tool_calls"))
                .filter_map(|calls| calls.as_array())
                .flatten()
                .filter_map(|call| call.get("search_result"))
                .filter_map(|r| r.as_array())
                .flatten()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for item in chunks {
        let title = match item.get("title").and_then(|t| t.as_str()) {
            Some(t) => t,
            None => continue,
        };
        let snippet = item.get("content").and_then(|c| c.as_str()).unwrap_or("");
        let source = item
            .get("link")
            .or_else(|| item.get("url"))
            .and_then(|u| u.as_str())
            .unwrap_or("");
        results.push(SearchResult {
            title: title.to_string(),
            snippet: snippet.chars().take(300).collect(),
            source: source.to_string(),
        });
        if results.len() >= limit.min(MAX_RESULTS) {
            break;
        }
    }

    results
}

#[async_trait]
impl SearchBackend for ZhipuSearch {
    fn name(&self) -> &str {
        "zhipu"
    }

    fn has_env_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        api_key_override: Option<&str>,
    ) -> Result<Vec<SearchResult>, WorkflowError> {
        let api_key = api_key_override
            .map(|k| k.to_string())
            .or_else(|| self.api_key.clone())
            .ok_or_else(|| {
                WorkflowError::SearchUnavailable("zhipu: no API key available".to_string())
            })?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": "glm-4-air",
            "messages": [{ "role": "user", "content": query }],
            "tools": [{
                "type": "web_search",
                "web_search": { "enable": true, "search_result": true }
            }]
        });

        tracing::info!("[ZhipuSearch] Querying: {}", query);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkflowError::SearchUnavailable(format!("zhipu: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| WorkflowError::SearchUnavailable(format!("zhipu: {}", e)))?;

        if !status.is_success() {
            let summary: String = response_text.chars().take(200).collect();
            return Err(WorkflowError::SearchUnavailable(format!(
                "zhipu: {} {}",
                status, summary
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| WorkflowError::SearchUnavailable(format!("zhipu: invalid JSON: {}", e)))?;

        Ok(flatten_results(&json, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_chunked_search_results() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [
                        {
                            "search_result": [
                                { "title": "First hit", "content": "Snippet one.", "link": "https://example.com/1" }
                            ]
                        },
                        {
                            "search_result": [
                                { "title": "Second hit", "content": "Snippet two.", "link": "https://example.com/2" },
                                { "title": "Third hit", "content": "Snippet three.", "link": "https://example.com/3" }
                            ]
                        }
                    ]
                }
            }]
        });
        let results = flatten_results(&json, 10);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "First hit");
        assert_eq!(results[2].source, "https://example.com/3");
    }

    #[test]
    fn respects_cap_across_chunks() {
        let chunk: Vec<_> = (0..8)
            .map(|i| serde_json::json!({ "title": format!("t{}", i), "content": "c", "link": "u" }))
            .collect();
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [
                        { "search_result": chunk.clone() },
                        { "search_result": chunk }
                    ]
                }
            }]
        });
        assert_eq!(flatten_results(&json, 10).len(), 10);
        assert_eq!(flatten_results(&json, 3).len(), 3);
    }

    #[test]
    fn no_tool_calls_is_empty() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "no search performed" } }]
        });
        assert!(flatten_results(&json, 10).is_empty());
    }
}
