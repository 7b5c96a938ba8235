//! ByteFlow CLI — command-line interface for the multi-agent report pipeline.
//!
//! Reuses the same core domain logic (byteflow-core) and server bootstrap
//! (byteflow-server) that power the web frontend.

mod commands;

use clap::{Parser, Subcommand};

/// ByteFlow CLI — Multi-agent report generation
#[derive(Parser)]
#[command(name = "byteflow", version, about = "ByteFlow CLI — Multi-agent report generation")]
pub struct Cli {
    /// Path to a pipeline YAML (falls back to the built-in pipeline)
    #[arg(long, env = "BYTEFLOW_PIPELINE")]
    pipeline: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ByteFlow HTTP backend server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3210)]
        port: u16,
        /// Path to static frontend directory
        #[arg(long)]
        static_dir: Option<String>,
    },

    /// Generate a report directly from the terminal
    Run {
        /// Report topic (at least 10 characters)
        topic: String,
        /// Target word count (advisory, passed into prompts)
        #[arg(long, default_value_t = 2000)]
        word_limit: u32,
        /// Report type label
        #[arg(long, default_value = "research report")]
        report_type: String,
        /// Augment search-enabled roles via the Baidu backend
        #[arg(long)]
        use_search: bool,
        /// Use the Zhipu search backend instead of Baidu
        #[arg(long)]
        alt_search: bool,
        /// Override every role's provider binding (ollama | qwen | ernie)
        #[arg(long)]
        model_provider: Option<String>,
        /// Print each agent's full output as it arrives
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Inspect pipeline definitions
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// Validate a pipeline YAML file without running it
    Validate {
        /// Path to the pipeline YAML file
        file: String,
    },
    /// List the roles of a pipeline in execution order
    Roles,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "byteflow_core=warn,byteflow_cli=info".into()),
        )
        .init();

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Server {
                host,
                port,
                static_dir,
            } => commands::server::run(host, port, cli.pipeline, static_dir).await,

            Commands::Run {
                topic,
                word_limit,
                report_type,
                use_search,
                alt_search,
                model_provider,
                verbose,
            } => {
                commands::run::run(
                    cli.pipeline.as_deref(),
                    &topic,
                    word_limit,
                    &report_type,
                    use_search,
                    alt_search,
                    model_provider,
                    verbose,
                )
                .await
            }

            Commands::Pipeline { action } => match action {
                PipelineAction::Validate { file } => commands::pipeline::validate(&file),
                PipelineAction::Roles => commands::pipeline::roles(cli.pipeline.as_deref()),
            },
        }
    } else {
        // No subcommand — show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
