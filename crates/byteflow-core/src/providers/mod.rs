//! Provider adapters — normalize chat-style completion calls across model
//! backends.
//!
//! Each adapter implements [`ModelBackend`]: system prompt + user prompt +
//! sampling parameters in, plain answer text out. Provider-internal framing
//! (reasoning payloads, scratch content) never reaches the caller. Adapters
//! keep no state between calls beyond the shared HTTP client.
//!
//! The [`ProviderRegistry`] is the closed lookup table built once at startup;
//! role definitions referencing an identifier not present here are rejected
//! at pipeline load time.

pub mod ernie;
pub mod ollama;
pub mod qwen;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkflowError;

pub use ernie::ErnieBackend;
pub use ollama::OllamaBackend;
pub use qwen::QwenBackend;

/// Request timeout applied to every provider call.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Normalized completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Enforce the adapter input contract before any network call.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.system_prompt.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "system prompt must not be empty".to_string(),
            ));
        }
        if self.user_prompt.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "user prompt must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(WorkflowError::InvalidRequest(format!(
                "temperature {} out of range 0.0–2.0",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(WorkflowError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A model backend capable of one-shot chat completion.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Provider identifier (matches role `provider` bindings).
    fn name(&self) -> &str;

    /// Run one completion. Returns only the user-facing answer text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, WorkflowError>;
}

/// Closed provider lookup table, built once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard table from environment configuration:
    /// `ollama` (local model server), `qwen` (DashScope cloud API),
    /// `ernie` (Baidu Qianfan, with retrieval-augmented mode).
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(OllamaBackend::from_env()));
        registry.insert(Arc::new(QwenBackend::from_env()));
        registry.insert(Arc::new(ErnieBackend::from_env()));
        registry
    }

    /// Register a backend under its own name.
    pub fn insert(&mut self, backend: Arc<dyn ModelBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Known provider identifiers, sorted for stable error messages.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Shared HTTP client for provider calls.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a transport-level reqwest error to the taxonomy.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> WorkflowError {
    WorkflowError::ProviderUnavailable(format!("{}: {}", provider, err))
}

/// Map a non-success HTTP status to the taxonomy. 401/403 are auth failures
/// (fatal, never retried); everything else is a response error.
pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> WorkflowError {
    let summary: String = body.chars().take(200).collect();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        WorkflowError::ProviderAuth(format!("{}: {} {}", provider, status, summary))
    } else {
        WorkflowError::ProviderResponse(format!("{}: {} {}", provider, status, summary))
    }
}
