//! Baidu search backend — Qianfan AI-search keyword API.
//!
//! POST {base}/v2/ai_search/chat/completions with `search_source:
//! baidu_search_v2`; hits arrive in the `references` array.

use async_trait::async_trait;

use crate::error::WorkflowError;

use super::{SearchBackend, SearchResult, MAX_RESULTS};

const QIANFAN_BASE_URL: &str = "https://qianfan.baidubce.com";

pub struct BaiduSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BaiduSearch {
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
            std::env::var("QIANFAN_BASE_URL").unwrap_or_else(|_| QIANFAN_BASE_URL.to_string()),
            std::env::var("BAIDU_API_KEY").ok(),
        )
    }
}

/// Parse the `references` array of an AI-search response.
fn parse_references(json: &serde_json::Value, limit: usize) -> Vec<SearchResult> {
    json.get("references")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let title = item.get("title").and_then(|t| t.as_str())?;
                    let snippet = item
                        .get("content")
                        .and_then(|c| c.as_str())
                        .unwrap_or("");
                    let source = item.get("url").and_then(|u| u.as_str()).unwrap_or("");
                    Some(SearchResult {
                        title: title.to_string(),
                        snippet: snippet.chars().take(300).collect(),
                        source: source.to_string(),
                    })
                })
                .take(limit.min(MAX_RESULTS))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchBackend for BaiduSearch {
    fn name(&self) -> &str {
        "baidu"
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
                WorkflowError::SearchUnavailable("baidu: no API key available".to_string())
            })?;

        let url = format!(
            "{}/v2/ai_search/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "messages": [{ "role": "user", "content": query }],
            "search_source": "baidu_search_v2",
            "resource_type_filter": [{ "type": "web", "top_k": limit.min(MAX_RESULTS) }]
        });

        tracing::info!("[BaiduSearch] Querying: {}", query);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkflowError::SearchUnavailable(format!("baidu: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| WorkflowError::SearchUnavailable(format!("baidu: {}", e)))?;

        if !status.is_success() {
            let summary: String = response_text.chars().take(200).collect();
            return Err(WorkflowError::SearchUnavailable(format!(
                "baidu: {} {}",
                status, summary
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| WorkflowError::SearchUnavailable(format!("baidu: invalid JSON: {}", e)))?;

        Ok(parse_references(&json, limit))
    }
}
