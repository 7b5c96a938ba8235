//! Workflow engine — the core state machine.
//!
//! One engine instance drives every task: `submit` validates the request,
//! registers the task, and spawns an independent run. Each run walks the
//! role pipeline in ordinal order, one step per role:
//!
//! 1. Check the cancellation flag (cooperative — only between steps).
//! 2. Accumulate prior outputs as attributed context when the role asks for it.
//! 3. Optionally augment the prompt with search results (failures degrade).
//! 4. Render the role's system-prompt template and build the user prompt.
//! 5. Call the bound provider with bounded, capped-exponential retry.
//! 6. Record the cleaned output, bump progress (clamped below 100 until the
//!    final role succeeds), and emit `agent_output` + `progress_update`.
//!
//! Every run ends with exactly one terminal event: `completion`, `error`,
//! or `cancelled`.

pub mod template;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::WorkflowError;
use crate::events::{ProgressChannel, ProgressEvent};
use crate::providers::{CompletionRequest, ModelBackend, ProviderRegistry};
use crate::roles::{RoleDefinition, RoleRegistry};
use crate::search::{self, SearchRegistry, MAX_RESULTS};
use crate::task::{ReportResult, RunOptions, StepOutput, TaskHandle, TaskRegistry, TaskStatus};
use crate::text;

/// Bounded retry with capped-exponential backoff for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Progress after `completed` of `total` steps: floor percentage, clamped to
/// 99 — only a successful final step may report 100.
pub fn progress_for(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed * 100 / total) as u8).min(99)
}

/// The workflow engine. Cheap to clone; all parts are shared handles.
#[derive(Clone)]
pub struct WorkflowEngine {
    roles: Arc<RoleRegistry>,
    providers: Arc<ProviderRegistry>,
    search: Arc<SearchRegistry>,
    tasks: TaskRegistry,
    channel: ProgressChannel,
    retry: RetryPolicy,
}

impl WorkflowEngine {
    pub fn new(
        roles: Arc<RoleRegistry>,
        providers: Arc<ProviderRegistry>,
        search: Arc<SearchRegistry>,
        tasks: TaskRegistry,
        channel: ProgressChannel,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            roles,
            providers,
            search,
            tasks,
            channel,
            retry,
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn channel(&self) -> &ProgressChannel {
        &self.channel
    }

    /// Validate and register a task, then start its run. Returns the task id.
    pub async fn submit(
        &self,
        client_id: &str,
        topic: &str,
        options: RunOptions,
    ) -> Result<String, WorkflowError> {
        if let Some(ref provider) = options.model_provider {
            if !self.providers.contains(provider) {
                return Err(WorkflowError::InvalidRequest(format!(
                    "Unknown model provider '{}' (known: {})",
                    provider,
                    self.providers.names().join(", ")
                )));
            }
        }

        if options.use_search {
            let backend_name = options.search_provider.as_deref().unwrap_or("baidu");
            let backend = self.search.get(backend_name).ok_or_else(|| {
                WorkflowError::InvalidRequest(format!(
                    "Unknown search provider '{}' (known: {})",
                    backend_name,
                    self.search.names().join(", ")
                ))
            })?;
            if !backend.has_env_key() && options.api_key.is_none() {
                return Err(WorkflowError::InvalidRequest(format!(
                    "Search provider '{}' requires an API key",
                    backend_name
                )));
            }
        }

        let handle = self.tasks.create(client_id, topic, options).await?;
        let task_id = {
            let mut task = handle.write().await;
            task.status = TaskStatus::Running;
            task.id.clone()
        };

        let engine = self.clone();
        let run_handle = handle.clone();
        tokio::spawn(async move {
            engine.run(run_handle).await;
        });

        Ok(task_id)
    }

    /// Execute the pipeline for one task. Owns the task for the duration of
    /// the run; the registry only reads and flags it from outside.
    async fn run(&self, handle: TaskHandle) {
        let (task_id, client_id, topic, options) = {
            let task = handle.read().await;
            (
                task.id.clone(),
                task.client_id.clone(),
                task.topic.clone(),
                task.options.clone(),
            )
        };

        let total = self.roles.len();
        tracing::info!(
            "[WorkflowEngine] Starting task {} ({} roles) for topic: {}",
            task_id,
            total,
            topic
        );

        self.channel
            .publish(
                &client_id,
                ProgressEvent::ProgressUpdate {
                    task_id: task_id.clone(),
                    status: TaskStatus::Running,
                    progress: 0,
                    message: "Report generation started".to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await;

        for (index, role) in self.roles.roles().iter().enumerate() {
            // Cancellation checkpoint — between steps only, never mid-call.
            if handle.read().await.cancel_requested {
                self.finish_cancelled(&handle, &task_id, &client_id).await;
                return;
            }

            match self
                .execute_step(&handle, role, index, total, &topic, &options)
                .await
            {
                Ok(output) => {
                    let progress = progress_for(index + 1, total);
                    {
                        let mut task = handle.write().await;
                        task.outputs.push(output.clone());
                        task.progress = progress;
                    }

                    self.channel
                        .publish(
                            &client_id,
                            ProgressEvent::AgentOutput {
                                task_id: task_id.clone(),
                                agent_name: role.name.clone(),
                                role_name: role.key.clone(),
                                step_name: output.step_name.clone(),
                                content: output.text.clone(),
                                word_count: text::count_words(&text::strip_markdown(&output.text)),
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                    self.channel
                        .publish(
                            &client_id,
                            ProgressEvent::ProgressUpdate {
                                task_id: task_id.clone(),
                                status: TaskStatus::Running,
                                progress,
                                message: format!(
                                    "{} completed ({}/{})",
                                    role.name,
                                    index + 1,
                                    total
                                ),
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                }
                Err(err) => {
                    self.finish_failed(&handle, &task_id, &client_id, role, err)
                        .await;
                    return;
                }
            }
        }

        self.finish_completed(&handle, &task_id, &client_id, &topic, &options)
            .await;
    }

    /// One step: context + augmentation + templating + provider call + cleanup.
    async fn execute_step(
        &self,
        handle: &TaskHandle,
        role: &RoleDefinition,
        index: usize,
        total: usize,
        topic: &str,
        options: &RunOptions,
    ) -> Result<StepOutput, WorkflowError> {
        let context = if role.include_prior_outputs {
            let task = handle.read().await;
            self.build_context(&task.outputs)
        } else {
            String::new()
        };

        let search_block = if role.augment_with_search && options.use_search {
            self.augment(topic, options).await
        } else {
            String::new()
        };

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("topic", topic.to_string());
        vars.insert("word_limit", options.word_limit.to_string());
        vars.insert("report_type", options.report_type.clone());
        vars.insert("context", context.clone());
        vars.insert("search_results", search_block.clone());

        let system_prompt = template::render(&role.system_prompt, &vars);
        let user_prompt = build_user_prompt(role, topic, options, &search_block, &context);

        let provider_key = options.model_provider.as_deref().unwrap_or(&role.provider);
        let backend = self.providers.get(provider_key).ok_or_else(|| {
            WorkflowError::Config(format!("Provider '{}' not registered", provider_key))
        })?;

        let request = CompletionRequest {
            system_prompt,
            user_prompt,
            temperature: role.temperature,
            max_tokens: role.max_tokens,
        };
        request.validate()?;

        tracing::info!(
            "[WorkflowEngine] Step {}/{}: {} via {}",
            index + 1,
            total,
            role.key,
            provider_key
        );

        let raw = self.call_with_retry(backend, &request, &role.key).await?;
        let cleaned = text::clean_response(&raw);

        Ok(StepOutput {
            role_key: role.key.clone(),
            step_name: format!("{}/{}", index + 1, total),
            char_count: cleaned.chars().count(),
            text: cleaned,
        })
    }

    /// Provider call with bounded retry. Auth errors are fatal immediately;
    /// transient errors back off and retry until the attempt budget runs out.
    async fn call_with_retry(
        &self,
        backend: Arc<dyn ModelBackend>,
        request: &CompletionRequest,
        role_key: &str,
    ) -> Result<String, WorkflowError> {
        let mut attempt = 0u32;
        loop {
            match backend.complete(request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "[WorkflowEngine] {} attempt {} failed: {} (retrying in {:?})",
                        role_key,
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Search augmentation. Transient failures get the same bounded retry as
    /// provider calls; once the budget is spent the step degrades to its
    /// un-augmented prompt instead of failing.
    async fn augment(&self, topic: &str, options: &RunOptions) -> String {
        let backend_name = options.search_provider.as_deref().unwrap_or("baidu");
        let backend = match self.search.get(backend_name) {
            Some(b) => b,
            None => return String::new(),
        };

        let mut attempt = 0u32;
        let results = loop {
            match backend
                .search(topic, MAX_RESULTS, options.api_key.as_deref())
                .await
            {
                Ok(results) => break results,
                Err(err) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "[WorkflowEngine] Search '{}' attempt {} failed: {} (retrying in {:?})",
                        backend_name,
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "[WorkflowEngine] Search '{}' unavailable, continuing without augmentation: {}",
                        backend_name,
                        err
                    );
                    return String::new();
                }
            }
        };

        tracing::info!(
            "[WorkflowEngine] Search '{}' returned {} results",
            backend_name,
            results.len()
        );
        search::format_results(&results)
    }

    /// Concatenate prior outputs, each attributed to its role, in execution order.
    fn build_context(&self, outputs: &[StepOutput]) -> String {
        let mut context = String::new();
        for output in outputs {
            let display = self
                .roles
                .get(&output.role_key)
                .map(|r| r.name.as_str())
                .unwrap_or(&output.role_key);
            context.push_str(&format!("### {}\n{}\n\n", display, output.text));
        }
        context.trim_end().to_string()
    }

    async fn finish_completed(
        &self,
        handle: &TaskHandle,
        task_id: &str,
        client_id: &str,
        topic: &str,
        options: &RunOptions,
    ) {
        let answer = {
            let task = handle.read().await;
            task.outputs
                .last()
                .map(|o| o.text.clone())
                .unwrap_or_default()
        };

        let result = ReportResult {
            word_count: text::count_words(&text::strip_markdown(&answer)),
            answer,
            question: topic.to_string(),
            word_limit: options.word_limit,
            report_type: options.report_type.clone(),
        };

        {
            let mut task = handle.write().await;
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.result = Some(result.clone());
            task.finished_at = Some(Utc::now());
        }

        tracing::info!("[WorkflowEngine] Task {} completed", task_id);
        self.channel
            .publish(
                client_id,
                ProgressEvent::Completion {
                    task_id: task_id.to_string(),
                    result,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    async fn finish_failed(
        &self,
        handle: &TaskHandle,
        task_id: &str,
        client_id: &str,
        role: &RoleDefinition,
        err: WorkflowError,
    ) {
        let message = format!("Step '{}' failed: {}", role.key, err);
        {
            let mut task = handle.write().await;
            task.status = TaskStatus::Failed;
            task.error = Some(message.clone());
            task.finished_at = Some(Utc::now());
        }

        tracing::error!("[WorkflowEngine] Task {} failed: {}", task_id, message);
        self.channel
            .publish(
                client_id,
                ProgressEvent::Error {
                    task_id: task_id.to_string(),
                    message,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    async fn finish_cancelled(&self, handle: &TaskHandle, task_id: &str, client_id: &str) {
        {
            let mut task = handle.write().await;
            task.status = TaskStatus::Cancelled;
            task.finished_at = Some(Utc::now());
        }

        tracing::info!("[WorkflowEngine] Task {} cancelled", task_id);
        self.channel
            .publish(
                client_id,
                ProgressEvent::Cancelled {
                    task_id: task_id.to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
}

/// Build the user prompt: search evidence first (unless the system template
/// already consumed it), then the writing instruction, then prior sections
/// (unless the template consumed those).
fn build_user_prompt(
    role: &RoleDefinition,
    topic: &str,
    options: &RunOptions,
    search_block: &str,
    context: &str,
) -> String {
    let mut prompt = String::new();

    if !search_block.is_empty() && !role.system_prompt.contains("${search_results}") {
        prompt.push_str(search_block);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "Write your section of the {} on: {}\nTarget length: about {} words.",
        options.report_type, topic, options.word_limit
    ));

    if !context.is_empty() && !role.system_prompt.contains("${context}") {
        prompt.push_str("\n\nPrior sections:\n");
        prompt.push_str(context);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::search::{SearchBackend, SearchResult};

    // ─── Stubs ──────────────────────────────────────────────────────────

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, WorkflowError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, WorkflowError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, WorkflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default stub output with enough text".to_string()))
        }
    }

    /// Backend whose first call signals the test and waits to be released,
    /// so cancellation can be requested deterministically mid-run.
    struct GatedBackend {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ModelBackend for GatedBackend {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, WorkflowError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("gated step output text".to_string())
        }
    }

    struct FailingSearch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchBackend for FailingSearch {
        fn name(&self) -> &str {
            "baidu"
        }

        fn has_env_key(&self) -> bool {
            true
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
            _api_key_override: Option<&str>,
        ) -> Result<Vec<SearchResult>, WorkflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkflowError::SearchUnavailable("stub outage".to_string()))
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    const TWO_ROLE_PIPELINE: &str = r#"
name: "Test Pipeline"
roles:
  - key: "role_a"
    name: "Role A"
    provider: "stub"
    ordinal: 0
    system_prompt: "Analyze ${topic}."
  - key: "role_b"
    name: "Role B"
    provider: "stub"
    ordinal: 1
    is_final: true
    include_prior_outputs: true
    system_prompt: "Synthesize ${topic} using:\n${context}"
"#;

    fn engine_with(
        backend: Arc<dyn ModelBackend>,
        search_backend: Option<Arc<dyn SearchBackend>>,
        pipeline_yaml: &str,
    ) -> WorkflowEngine {
        let mut providers = ProviderRegistry::new();
        providers.insert(backend);

        let mut search_registry = SearchRegistry::new();
        if let Some(s) = search_backend {
            search_registry.insert(s);
        }

        let roles = RoleRegistry::from_yaml(pipeline_yaml, &providers.names()).unwrap();

        WorkflowEngine::new(
            Arc::new(roles),
            Arc::new(providers),
            Arc::new(search_registry),
            TaskRegistry::default(),
            ProgressChannel::new(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        )
    }

    async fn collect_until_terminal(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
    ) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("channel closed before terminal event");
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    fn agent_outputs(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
        events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::AgentOutput { .. }))
            .collect()
    }

    // ─── Tests ──────────────────────────────────────────────────────────

    #[test]
    fn progress_is_floored_and_clamped() {
        assert_eq!(progress_for(0, 6), 0);
        assert_eq!(progress_for(1, 6), 16);
        assert_eq!(progress_for(5, 6), 83);
        assert_eq!(progress_for(6, 6), 99); // 100 is reserved for completion
        assert_eq!(progress_for(1, 1), 99);
        assert_eq!(progress_for(0, 0), 0);
    }

    #[test]
    fn retry_delay_is_capped_exponential() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn happy_path_emits_outputs_then_completion() {
        let backend = ScriptedBackend::new(vec![
            Ok("Role A **analysis** of the topic in depth.".to_string()),
            Ok("Final synthesized report answer text.".to_string()),
        ]);
        let engine = engine_with(backend, None, TWO_ROLE_PIPELINE);

        let (_generation, mut rx) = engine.channel().subscribe("client-1").await;
        let task_id = engine
            .submit(
                "client-1",
                "What is the impact of AI on jobs?",
                RunOptions::default(),
            )
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;

        // Exactly two agent outputs, in role-ordinal order.
        let outputs = agent_outputs(&events);
        assert_eq!(outputs.len(), 2);
        match (outputs[0], outputs[1]) {
            (
                ProgressEvent::AgentOutput {
                    role_name: a,
                    content,
                    word_count,
                    ..
                },
                ProgressEvent::AgentOutput { role_name: b, .. },
            ) => {
                assert_eq!(a, "role_a");
                assert_eq!(b, "role_b");
                // Word counts are taken on markdown-stripped text, same as
                // the final result.
                assert!(content.contains("**analysis**"));
                assert_eq!(
                    *word_count,
                    text::count_words(&text::strip_markdown(content))
                );
            }
            _ => unreachable!(),
        }

        // One terminal event, a completion carrying the final role's text.
        match events.last().unwrap() {
            ProgressEvent::Completion { result, .. } => {
                assert_eq!(result.answer, "Final synthesized report answer text.");
                assert_eq!(result.question, "What is the impact of AI on jobs?");
            }
            other => panic!("expected completion, got {:?}", other),
        }

        // Progress updates are non-decreasing and stay below 100.
        let mut last = 0u8;
        for event in &events {
            if let ProgressEvent::ProgressUpdate { progress, .. } = event {
                assert!(*progress >= last);
                assert!(*progress < 100);
                last = *progress;
            }
        }

        // The stored task reaches 100 exactly at completion.
        let snap = engine.tasks().snapshot(&task_id).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.outputs.len(), 2);
    }

    #[tokio::test]
    async fn cancel_between_steps_stops_the_pipeline() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let backend = Arc::new(GatedBackend {
            started: started.clone(),
            release: release.clone(),
        });
        let engine = engine_with(backend, None, TWO_ROLE_PIPELINE);

        let (_generation, mut rx) = engine.channel().subscribe("client-1").await;
        let task_id = engine
            .submit(
                "client-1",
                "Cancellation behaviour exploration topic",
                RunOptions::default(),
            )
            .await
            .unwrap();

        // Step 1 is in flight: request cancellation, then let it finish.
        started.notified().await;
        engine.tasks().cancel(&task_id).await.unwrap();
        release.notify_one();

        let events = collect_until_terminal(&mut rx).await;

        // Step 1 completed (cancellation is cooperative, never mid-step),
        // then the checkpoint observed the flag: no step 2, no completion.
        assert_eq!(agent_outputs(&events).len(), 1);
        assert!(matches!(
            events.last().unwrap(),
            ProgressEvent::Cancelled { .. }
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Completion { .. })));

        let snap = engine.tasks().snapshot(&task_id).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Cancelled);
        assert_eq!(snap.outputs.len(), 1);
    }

    #[tokio::test]
    async fn search_failure_degrades_instead_of_failing() {
        let pipeline = r#"
name: "Search Pipeline"
roles:
  - key: "researcher"
    name: "Researcher"
    provider: "stub"
    ordinal: 0
    augment_with_search: true
    is_final: true
    system_prompt: "Research ${topic}. ${search_results}"
"#;
        let backend = ScriptedBackend::new(vec![Ok(
            "Research section produced without augmentation.".to_string()
        )]);
        let failing_search = Arc::new(FailingSearch {
            calls: AtomicUsize::new(0),
        });
        let engine = engine_with(backend.clone(), Some(failing_search.clone()), pipeline);

        let (_generation, mut rx) = engine.channel().subscribe("client-1").await;
        let options = RunOptions {
            use_search: true,
            search_provider: Some("baidu".to_string()),
            ..RunOptions::default()
        };
        engine
            .submit("client-1", "Degradation handling topic", options)
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;

        // The search call is retried up to the attempt budget, then the step
        // proceeds without augmentation.
        assert_eq!(failing_search.calls.load(Ordering::SeqCst), 3);
        assert_eq!(agent_outputs(&events).len(), 1);
        assert!(matches!(
            events.last().unwrap(),
            ProgressEvent::Completion { .. }
        ));
    }

    #[tokio::test]
    async fn auth_error_fails_task_with_zero_retries() {
        let backend = ScriptedBackend::new(vec![Err(WorkflowError::ProviderAuth(
            "stub: key rejected".to_string(),
        ))]);
        let engine = engine_with(backend.clone(), None, TWO_ROLE_PIPELINE);

        let (_generation, mut rx) = engine.channel().subscribe("client-1").await;
        let task_id = engine
            .submit("client-1", "Auth failure handling topic", RunOptions::default())
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;

        // One call, no retry, no agent output, error terminal event.
        assert_eq!(backend.call_count(), 1);
        assert!(agent_outputs(&events).is_empty());
        match events.last().unwrap() {
            ProgressEvent::Error { message, .. } => {
                assert!(message.contains("role_a"));
            }
            other => panic!("expected error, got {:?}", other),
        }

        let snap = engine.tasks().snapshot(&task_id).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let backend = ScriptedBackend::new(vec![
            Err(WorkflowError::ProviderUnavailable("timeout".to_string())),
            Err(WorkflowError::ProviderResponse("empty body".to_string())),
            Ok("Recovered output after retries.".to_string()),
            Ok("Final answer after a rocky start.".to_string()),
        ]);
        let engine = engine_with(backend.clone(), None, TWO_ROLE_PIPELINE);

        let (_generation, mut rx) = engine.channel().subscribe("client-1").await;
        engine
            .submit("client-1", "Retry behaviour exploration topic", RunOptions::default())
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;

        assert_eq!(backend.call_count(), 4); // 3 attempts for step 1, 1 for step 2
        assert_eq!(agent_outputs(&events).len(), 2);
        assert!(matches!(
            events.last().unwrap(),
            ProgressEvent::Completion { .. }
        ));
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_fails_the_task() {
        let backend = ScriptedBackend::new(vec![
            Err(WorkflowError::ProviderUnavailable("outage 1".to_string())),
            Err(WorkflowError::ProviderUnavailable("outage 2".to_string())),
            Err(WorkflowError::ProviderUnavailable("outage 3".to_string())),
        ]);
        let engine = engine_with(backend.clone(), None, TWO_ROLE_PIPELINE);

        let (_generation, mut rx) = engine.channel().subscribe("client-1").await;
        engine
            .submit("client-1", "Retry exhaustion handling topic", RunOptions::default())
            .await
            .unwrap();

        let events = collect_until_terminal(&mut rx).await;

        assert_eq!(backend.call_count(), 3);
        assert!(matches!(events.last().unwrap(), ProgressEvent::Error { .. }));
    }

    #[tokio::test]
    async fn unknown_model_provider_override_is_invalid_request() {
        let backend = ScriptedBackend::new(vec![]);
        let engine = engine_with(backend, None, TWO_ROLE_PIPELINE);

        let options = RunOptions {
            model_provider: Some("gpt-nowhere".to_string()),
            ..RunOptions::default()
        };
        let err = engine
            .submit("client-1", "Provider override check topic", options)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_search_backend_is_invalid_request() {
        let backend = ScriptedBackend::new(vec![]);
        // No search backends registered at all.
        let engine = engine_with(backend, None, TWO_ROLE_PIPELINE);

        let options = RunOptions {
            use_search: true,
            search_provider: Some("duckduckgone".to_string()),
            ..RunOptions::default()
        };
        let err = engine
            .submit("client-1", "Search backend lookup check topic", options)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRequest(_)));
        assert!(err.to_string().contains("duckduckgone"));
    }

    #[tokio::test]
    async fn search_without_any_key_is_invalid_request() {
        let backend = ScriptedBackend::new(vec![]);
        // Real baidu backend with no env key configured.
        let engine = {
            let mut providers = ProviderRegistry::new();
            providers.insert(backend);
            let mut search_registry = SearchRegistry::new();
            search_registry.insert(Arc::new(crate::search::BaiduSearch::new(
                "https://qianfan.baidubce.com".to_string(),
                None,
            )));
            let roles = RoleRegistry::from_yaml(TWO_ROLE_PIPELINE, &providers.names()).unwrap();
            WorkflowEngine::new(
                Arc::new(roles),
                Arc::new(providers),
                Arc::new(search_registry),
                TaskRegistry::default(),
                ProgressChannel::new(),
                RetryPolicy::default(),
            )
        };

        let options = RunOptions {
            use_search: true,
            search_provider: Some("baidu".to_string()),
            ..RunOptions::default()
        };
        let err = engine
            .submit("client-1", "Missing search key check topic", options)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRequest(_)));
    }

    #[test]
    fn user_prompt_avoids_duplicating_template_slots() {
        let role = RoleDefinition {
            key: "r".to_string(),
            name: "R".to_string(),
            provider: "stub".to_string(),
            system_prompt: "Use ${search_results} and ${context}.".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            ordinal: 0,
            include_prior_outputs: true,
            augment_with_search: true,
            is_final: true,
        };
        let options = RunOptions::default();
        let prompt = build_user_prompt(
            &role,
            "Some topic",
            &options,
            "Reference search results:\n1. hit",
            "### Prior\ntext",
        );
        // Both blocks live in the system template, so the user prompt is
        // just the instruction.
        assert!(!prompt.contains("Reference search results"));
        assert!(!prompt.contains("### Prior"));
        assert!(prompt.contains("Some topic"));

        let plain_role = RoleDefinition {
            system_prompt: "Analyze ${topic}.".to_string(),
            ..role
        };
        let prompt = build_user_prompt(
            &plain_role,
            "Some topic",
            &options,
            "Reference search results:\n1. hit",
            "### Prior\ntext",
        );
        assert!(prompt.starts_with("Reference search results"));
        assert!(prompt.contains("### Prior"));
    }
}
