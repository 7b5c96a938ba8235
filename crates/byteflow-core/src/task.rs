//! Task model and in-memory task registry.
//!
//! The registry is the process-wide map of task id → live task state. The
//! map itself is synchronized; each task is single-writer (the engine run
//! that owns it) and multi-reader (status queries, cancellation). Terminal
//! tasks stay reachable for a bounded retention window so late status
//! queries succeed, then a background sweeper evicts them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::WorkflowError;

/// Minimum accepted topic length, in characters.
pub const MIN_TOPIC_CHARS: usize = 10;

/// Lifecycle state of a report task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Options supplied with a report submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Whether search augmentation is requested at all
    #[serde(default)]
    pub use_search: bool,

    /// Which search backend to use ("baidu" or "zhipu")
    #[serde(default)]
    pub search_provider: Option<String>,

    /// Override the provider for every role (otherwise each role's binding applies)
    #[serde(default)]
    pub model_provider: Option<String>,

    /// Request-scoped search API key override. Never logged, never echoed.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Advisory target word count, passed into prompt templates only
    #[serde(default = "default_word_limit")]
    pub word_limit: u32,

    /// Report type label (e.g., "行业研究报告", "analysis")
    #[serde(default = "default_report_type")]
    pub report_type: String,
}

fn default_word_limit() -> u32 {
    2000
}

fn default_report_type() -> String {
    "research report".to_string()
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_search: false,
            search_provider: None,
            model_provider: None,
            api_key: None,
            word_limit: default_word_limit(),
            report_type: default_report_type(),
        }
    }
}

/// Immutable record of one role's execution within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub role_key: String,
    pub step_name: String,
    pub text: String,
    pub char_count: usize,
}

/// The assembled final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResult {
    pub answer: String,
    pub question: String,
    pub word_count: usize,
    pub word_limit: u32,
    #[serde(rename = "type")]
    pub report_type: String,
}

/// One in-flight or completed report generation.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub client_id: String,
    pub topic: String,
    pub options: RunOptions,
    pub status: TaskStatus,
    /// 0–100; monotone non-decreasing while running
    pub progress: u8,
    pub outputs: Vec<StepOutput>,
    pub cancel_requested: bool,
    pub result: Option<ReportResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    fn new(client_id: &str, topic: &str, options: RunOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            options,
            status: TaskStatus::Pending,
            progress: 0,
            outputs: Vec::new(),
            cancel_requested: false,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Shared handle to a live task. Single-writer (the executing run),
/// multi-reader (status queries, cancellation).
pub type TaskHandle = Arc<RwLock<Task>>;

struct TaskRegistryInner {
    tasks: HashMap<String, TaskHandle>,
}

/// Process-wide map of task id → live task state. Injected everywhere it is
/// needed; there is no global singleton.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RwLock<TaskRegistryInner>>,
    /// How long terminal tasks stay queryable before eviction
    retention: Duration,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TaskRegistryInner {
                tasks: HashMap::new(),
            })),
            retention,
        }
    }

    /// Create and register a new task. Fails with `InvalidRequest` when the
    /// trimmed topic is shorter than [`MIN_TOPIC_CHARS`]; no task is created
    /// in that case.
    pub async fn create(
        &self,
        client_id: &str,
        topic: &str,
        options: RunOptions,
    ) -> Result<TaskHandle, WorkflowError> {
        let trimmed = topic.trim();
        if trimmed.chars().count() < MIN_TOPIC_CHARS {
            return Err(WorkflowError::InvalidRequest(format!(
                "Topic must be at least {} characters",
                MIN_TOPIC_CHARS
            )));
        }

        let task = Task::new(client_id, trimmed, options);
        let id = task.id.clone();
        let handle: TaskHandle = Arc::new(RwLock::new(task));

        let mut inner = self.inner.write().await;
        inner.tasks.insert(id.clone(), handle.clone());

        tracing::info!("[TaskRegistry] Created task {} for client {}", id, client_id);
        Ok(handle)
    }

    /// Get the live handle for a task.
    pub async fn get(&self, task_id: &str) -> Option<TaskHandle> {
        let inner = self.inner.read().await;
        inner.tasks.get(task_id).cloned()
    }

    /// Clone the current state of a task (eventually-consistent snapshot).
    pub async fn snapshot(&self, task_id: &str) -> Option<Task> {
        let handle = self.get(task_id).await?;
        let task = handle.read().await;
        Some(task.clone())
    }

    /// Snapshots of all known tasks, newest first.
    pub async fn snapshots(&self) -> Vec<Task> {
        let handles: Vec<TaskHandle> = {
            let inner = self.inner.read().await;
            inner.tasks.values().cloned().collect()
        };
        let mut tasks = Vec::with_capacity(handles.len());
        for handle in handles {
            tasks.push(handle.read().await.clone());
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Request cancellation. Sets the flag and returns immediately — the run
    /// observes it at its next between-step checkpoint. Cancelling a task
    /// that already finished reports its terminal status instead of erroring.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskStatus, WorkflowError> {
        let handle = self
            .get(task_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(format!("Task {} not found", task_id)))?;

        let mut task = handle.write().await;
        if task.status.is_terminal() {
            return Ok(task.status);
        }

        task.cancel_requested = true;
        tracing::info!("[TaskRegistry] Cancellation requested for task {}", task_id);
        Ok(task.status)
    }

    /// Evict terminal tasks older than the retention window.
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::hours(1));

        let mut expired: Vec<String> = Vec::new();
        {
            let inner = self.inner.read().await;
            for (id, handle) in inner.tasks.iter() {
                let task = handle.read().await;
                if task.status.is_terminal() {
                    if let Some(finished) = task.finished_at {
                        if finished < cutoff {
                            expired.push(id.clone());
                        }
                    }
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut inner = self.inner.write().await;
        for id in &expired {
            inner.tasks.remove(id);
        }
        tracing::debug!("[TaskRegistry] Swept {} expired tasks", expired.len());
        expired.len()
    }

    /// Spawn the background sweeper task.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }
}
