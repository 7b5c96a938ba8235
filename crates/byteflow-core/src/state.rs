//! Shared application state for the axum server and CLI runners.

use std::sync::Arc;

use crate::error::WorkflowError;
use crate::events::ProgressChannel;
use crate::providers::ProviderRegistry;
use crate::roles::RoleRegistry;
use crate::search::SearchRegistry;
use crate::task::TaskRegistry;
use crate::workflow::{RetryPolicy, WorkflowEngine};

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub roles: Arc<RoleRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub search: Arc<SearchRegistry>,
    pub tasks: TaskRegistry,
    pub channel: ProgressChannel,
    pub engine: WorkflowEngine,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire everything together from a validated role registry. Providers and
    /// search backends come from the environment.
    pub fn new(roles: RoleRegistry) -> Self {
        let roles = Arc::new(roles);
        let providers = Arc::new(ProviderRegistry::from_env());
        let search = Arc::new(SearchRegistry::from_env());
        let tasks = TaskRegistry::default();
        let channel = ProgressChannel::new();
        let engine = WorkflowEngine::new(
            roles.clone(),
            providers.clone(),
            search.clone(),
            tasks.clone(),
            channel.clone(),
            RetryPolicy::default(),
        );
        Self {
            roles,
            providers,
            search,
            tasks,
            channel,
            engine,
        }
    }

    /// State backed by the pipeline file at `path`, or the built-in pipeline
    /// when no path is given.
    pub fn from_pipeline(path: Option<&str>) -> Result<Self, WorkflowError> {
        let providers = ProviderRegistry::from_env();
        let roles = match path {
            Some(p) => RoleRegistry::from_file(p, &providers.names())?,
            None => RoleRegistry::builtin(&providers.names())?,
        };
        Ok(Self::new(roles))
    }
}
