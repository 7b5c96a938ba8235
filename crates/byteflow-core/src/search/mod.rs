//! Search augmenters — fold external search results into a step's prompt.
//!
//! Augmentation is strictly best-effort: every failure surfaces as
//! `SearchUnavailable`, which callers treat as non-fatal. A step whose
//! augmentation fails runs with its un-augmented prompt.

pub mod baidu;
pub mod zhipu;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

pub use baidu::BaiduSearch;
pub use zhipu::ZhipuSearch;

/// Maximum number of results returned by any backend.
pub const MAX_RESULTS: usize = 10;

/// One normalized search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub source: String,
}

/// A search backend capable of keyword retrieval.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend identifier (matches `search_provider` run options).
    fn name(&self) -> &str;

    /// Whether a credential is available from the environment (request-scoped
    /// overrides can still supply one per call).
    fn has_env_key(&self) -> bool;

    /// Run a search, returning at most `limit` results. `api_key_override`
    /// takes precedence over any environment credential for this call only.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        api_key_override: Option<&str>,
    ) -> Result<Vec<SearchResult>, WorkflowError>;
}

/// Closed search-backend lookup table, built once at startup.
#[derive(Clone, Default)]
pub struct SearchRegistry {
    backends: HashMap<String, Arc<dyn SearchBackend>>,
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard table: `baidu` (Qianfan AI search) and `zhipu` (web-search
    /// retrieval).
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(BaiduSearch::from_env()));
        registry.insert(Arc::new(ZhipuSearch::from_env()));
        registry
    }

    pub fn insert(&mut self, backend: Arc<dyn SearchBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Render results as a prompt-ready evidence block.
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut out = String::from("Reference search results:\n");
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} — {} ({})\n",
            i + 1,
            result.title,
            result.snippet,
            result.source
        ));
    }
    out
}
