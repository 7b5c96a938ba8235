//! `byteflow run` — generate a report from the terminal, streaming progress.

use byteflow_core::events::ProgressEvent;
use byteflow_core::state::AppStateInner;
use byteflow_core::task::RunOptions;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    pipeline_path: Option<&str>,
    topic: &str,
    word_limit: u32,
    report_type: &str,
    use_search: bool,
    alt_search: bool,
    model_provider: Option<String>,
    verbose: bool,
) -> Result<(), String> {
    let state = AppStateInner::from_pipeline(pipeline_path).map_err(|e| e.to_string())?;

    let client_id = format!("cli-{}", uuid::Uuid::new_v4());
    let (_generation, mut events) = state.channel.subscribe(&client_id).await;

    let options = RunOptions {
        use_search: use_search || alt_search,
        search_provider: if alt_search {
            Some("zhipu".to_string())
        } else if use_search {
            Some("baidu".to_string())
        } else {
            None
        },
        model_provider,
        api_key: None,
        word_limit,
        report_type: report_type.to_string(),
    };

    let task_id = state
        .engine
        .submit(&client_id, topic, options)
        .await
        .map_err(|e| e.to_string())?;
    println!("Task {} started ({} roles)", task_id, state.roles.len());

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::ProgressUpdate {
                progress, message, ..
            } => {
                println!("[{:>3}%] {}", progress, message);
            }
            ProgressEvent::AgentOutput {
                agent_name,
                content,
                word_count,
                ..
            } => {
                if verbose {
                    println!("\n── {} ──\n{}\n", agent_name, content);
                } else {
                    println!("       {} produced {} words", agent_name, word_count);
                }
            }
            ProgressEvent::Completion { result, .. } => {
                println!("\n{}", result.answer);
                println!(
                    "\nDone: {} words (target {})",
                    result.word_count, result.word_limit
                );
                return Ok(());
            }
            ProgressEvent::Error { message, .. } => {
                return Err(message);
            }
            ProgressEvent::Cancelled { .. } => {
                return Err("Task was cancelled".to_string());
            }
            ProgressEvent::Pong { .. } => {}
        }
    }

    Err("Progress channel closed before the task finished".to_string())
}
