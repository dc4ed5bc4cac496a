/// CLI interface for ocr-batch: command parsing and the async entrypoint.
///
/// All batch logic (discovery, provider adapter, dispatcher, emitter) lives in
/// `ocr-batch-core`; this module only loads configuration and wires it up.
///
/// - [`Cli`] defines the user-facing subcommands.
/// - [`run`] is the async entrypoint shared by `main` and the integration tests.
///
/// Exit behavior: configuration problems (unreadable config, missing API key,
/// missing input directory) return an error and the process exits non-zero.
/// A batch that completes exits zero even when some files failed; the printed
/// summary lists them.
use crate::load_config::{load_cli_config, CliConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ocr_batch_core::batch::{BatchOrchestrator, BatchRun, BatchSettings};
use ocr_batch_core::contract::InferenceProvider;
use ocr_batch_core::discovery::list_tasks;
use ocr_batch_core::dispatch::{DispatchOutcome, Dispatcher};
use ocr_batch_core::emit::OutputEmitter;
use ocr_batch_core::prompts::chat_request;
use ocr_batch_core::provider::BedrockAdapter;
use std::path::PathBuf;

/// CLI for ocr-batch: bulk OCR of a local directory through a document-intelligence API.
#[derive(Parser)]
#[clap(
    name = "ocr-batch",
    version,
    about = "OCR every document in a directory and write JSON and Markdown results per file"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// OCR every supported file in the configured input directory
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Overrides `input_dir` from the config file
        #[clap(long)]
        input_dir: Option<PathBuf>,
    },
    /// Send a single chat message through the configured provider
    Chat {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// The user message
        #[clap(long)]
        message: String,
        /// Optional system prompt
        #[clap(long)]
        system: Option<String>,
    },
    /// List the files a run would process, without calling the provider
    List {
        #[clap(long)]
        input_dir: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config, input_dir } => {
            let mut config = load_cli_config(&config)?;
            if let Some(dir) = input_dir {
                config.run.input_dir = dir;
            }
            tracing::info!(command = "run", "Starting batch OCR");
            let report = run_batch(config).await?;
            print_summary(&report);
            Ok(())
        }
        Commands::Chat {
            config,
            message,
            system,
        } => {
            let config = load_cli_config(&config)?;
            tracing::info!(command = "chat", "Sending chat message");
            run_chat(config, &message, system.as_deref()).await
        }
        Commands::List { input_dir } => {
            let tasks = list_tasks(&input_dir)
                .with_context(|| format!("Cannot list {}", input_dir.display()))?;
            for task in &tasks {
                println!("{}", task.path.display());
            }
            println!("{} file(s) would be processed", tasks.len());
            Ok(())
        }
    }
}

async fn run_batch(config: CliConfig) -> Result<BatchRun> {
    let CliConfig {
        run: run_config,
        credentials,
    } = config;
    run_config.trace_loaded();

    let adapter =
        BedrockAdapter::new(&run_config.provider).context("Failed to construct provider adapter")?;
    let orchestrator = BatchOrchestrator::new(
        adapter,
        Dispatcher::new(run_config.dispatch.clone()),
        OutputEmitter::new(&run_config.output),
        BatchSettings {
            model_id: run_config.provider.model_id.clone(),
            credentials,
            require_tasks: run_config.require_tasks,
        },
    );

    match orchestrator.run_directory(&run_config.input_dir).await {
        Ok(report) => {
            tracing::info!(command = "run", run_id = %report.run_id, "Batch finished");
            Ok(report)
        }
        Err(e) => {
            tracing::error!(command = "run", error = %e, "Batch aborted");
            Err(anyhow::Error::new(e).context("Batch aborted before any file was processed"))
        }
    }
}

fn print_summary(report: &BatchRun) {
    println!(
        "Batch complete: {} succeeded, {} failed, {} total",
        report.succeeded, report.failed, report.total
    );
    println!(
        "Tokens: {} input, {} output; wall time {:.2} seconds",
        report.input_tokens,
        report.output_tokens,
        report.wall_time_ms as f64 / 1000.0
    );
    for record in &report.records {
        if let DispatchOutcome::Failure {
            message, attempts, ..
        } = &record.outcome
        {
            println!(
                "  FAILED {} after {} attempt(s): {}",
                record.task.file_name(),
                attempts,
                message
            );
        }
    }
    let incomplete = report.incomplete_artifacts();
    if incomplete > 0 {
        println!("  {incomplete} file(s) have missing artifacts, see log for details");
    }
}

async fn run_chat(config: CliConfig, message: &str, system: Option<&str>) -> Result<()> {
    let CliConfig {
        run: run_config,
        credentials,
    } = config;
    let adapter =
        BedrockAdapter::new(&run_config.provider).context("Failed to construct provider adapter")?;
    let dispatcher = Dispatcher::new(run_config.dispatch.clone());
    let request = chat_request(&run_config.provider.model_id, &credentials, system, message);

    let adapter = &adapter;
    let request = &request;
    match dispatcher.dispatch("chat", || adapter.invoke(request)).await {
        DispatchOutcome::Success {
            response,
            elapsed_ms,
            ..
        } => {
            println!("{}", response.content);
            println!(
                "\n[{} | {} input tokens, {} output tokens, {:.2} seconds]",
                response.model_used,
                response.input_tokens,
                response.output_tokens,
                elapsed_ms as f64 / 1000.0
            );
            Ok(())
        }
        DispatchOutcome::Failure {
            message, attempts, ..
        } => {
            tracing::error!(command = "chat", attempts, error = %message, "Chat failed");
            Err(anyhow::anyhow!(
                "Chat failed after {attempts} attempt(s): {message}"
            ))
        }
    }
}
