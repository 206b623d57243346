mod config;
mod publish;
mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use razor_llm::{Generate, LlmClient, LoggingMiddleware, OpenAiAdapter, UsageMiddleware};
use razor_pipeline::{
    FileCheckpointStore, PipelineEvent, PipelineReport, Retrying, RunContext, Services,
    StageOrchestrator, StartMode,
};
use razor_tools::{DependencyToolRegistry, DockerSandbox, ExecutionEnvironment, LocalExecutionEnvironment};
use razor_types::SessionId;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "debtrazor",
    version,
    about = "Document, plan and migrate a legacy codebase, resumably"
)]
struct Cli {
    /// Path to the YAML run configuration
    config: PathBuf,

    /// Commit and push the migrated code once the pipeline completes
    #[arg(long)]
    create_pull_request: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_tracing(cli.verbose, config.trace_log_path().as_deref())?;
    config.validate()?;
    if cli.create_pull_request && config.publish.is_none() {
        anyhow::bail!("--create-pull-request needs a `publish` section in the config");
    }

    let started = chrono::Utc::now();
    let report = run(&cli, &config).await?;

    let elapsed = chrono::Utc::now() - started;
    println!("\nMigration finished in {}s", elapsed.num_seconds());
    print_report(&report);
    Ok(())
}

/// Console output at `info` (`debug` with `-v`, `RUST_LOG` wins), plus a
/// debug-level file layer when `trace_log` is set.
fn init_tracing(verbose: bool, trace_log: Option<&Path>) -> anyhow::Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let console = tracing_subscriber::fmt::layer().with_filter(filter);

    let file = match trace_log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(log))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    if let Some(path) = trace_log {
        tracing::info!(path = %path.display(), "Writing trace log");
    }
    Ok(())
}

async fn run(cli: &Cli, config: &Config) -> anyhow::Result<PipelineReport> {
    std::fs::create_dir_all(&config.output_path)?;

    let usage = UsageMiddleware::new();
    let generator = build_generator(config, usage.clone())?;
    let env: Arc<dyn ExecutionEnvironment> =
        Arc::new(LocalExecutionEnvironment::new(config.output_path.clone()));
    let services = Services {
        generator,
        env: env.clone(),
        dependency_tools: DependencyToolRegistry::with_defaults(),
    };
    let store = Arc::new(FileCheckpointStore::under_output(&config.output_path));

    let session_id = match &config.thread_id {
        Some(id) => SessionId::new(id.clone()),
        None => {
            let id = SessionId::generate();
            tracing::info!(thread_id = %id, "No thread_id configured; set it to resume this run");
            id
        }
    };
    println!("Session: {}", session_id);
    println!("Legacy source: {}", config.entry_path.display());
    println!("Output: {}", config.output_path.display());

    let ctx = RunContext::new(session_id);
    let progress = tokio::spawn(print_progress(ctx.events.subscribe()));

    let orchestrator = StageOrchestrator::new(config.stage_settings(), services, store);
    let result = orchestrator.run(&ctx).await;
    drop(ctx);
    if let Err(e) = progress.await {
        tracing::warn!(error = %e, "Progress printer stopped abnormally");
    }
    let report = result?;

    tracing::info!(
        calls = usage.calls(),
        input_tokens = usage.total_input_tokens(),
        output_tokens = usage.total_output_tokens(),
        "Generation usage"
    );

    if let Some(verify) = &config.verify {
        let sandbox = DockerSandbox::new(env.clone());
        let out =
            verify::run_verification(&sandbox, verify, &report.migration.target_root).await?;
        println!("\nVerification output:\n{}", out.output.trim_end());
        if out.timed_out {
            anyhow::bail!("verification timed out after {}ms", verify.timeout_ms);
        }
        if out.exit_code != 0 {
            anyhow::bail!("verification failed with exit code {}", out.exit_code);
        }
        println!("Verification passed");
    }

    if cli.create_pull_request {
        if let Some(publish) = &config.publish {
            let outcome =
                publish::publish(env.as_ref(), publish, &report.migration.target_root).await?;
            println!(
                "Pushed branch {} to {}{}",
                outcome.branch,
                publish.remote,
                if outcome.committed { "" } else { " (no new commit)" }
            );
        }
    }

    Ok(report)
}

fn build_generator(
    config: &Config,
    usage: UsageMiddleware,
) -> anyhow::Result<Arc<dyn Generate>> {
    let mut adapter = OpenAiAdapter::from_env_var(&config.llm.api_key_env).map_err(|e| {
        anyhow::anyhow!("{} (set {})", e, config.llm.api_key_env)
    })?;
    if let Some(url) = &config.llm.base_url {
        adapter = adapter.with_base_url(url.clone());
    }
    let mut client = LlmClient::new()
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage);
    client.register_provider(adapter);
    Ok(Arc::new(Retrying::new(client, config.llm.max_retries)))
}

async fn print_progress(mut events: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("{}", line);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Progress printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// One console line per event worth showing; `None` for the noisy ones.
fn describe(event: &PipelineEvent) -> Option<String> {
    let line = match event {
        PipelineEvent::StageStarted { stage, mode } => match mode {
            StartMode::Fresh => format!("==> {}", stage),
            StartMode::Resumed => format!("==> {} (resumed)", stage),
        },
        PipelineEvent::StageSkipped { stage } => format!("==> {} (already complete)", stage),
        PipelineEvent::StageCompleted { stage } => format!("    {} done", stage),
        PipelineEvent::FileDocumented { file, reused } => {
            if *reused {
                format!("  = {}", file)
            } else {
                format!("  + {}", file)
            }
        }
        PipelineEvent::FileFailed { file, error } => format!("  ! {}: {}", file, error),
        PipelineEvent::ReadmeWritten { directory } => {
            let directory = if directory.is_empty() { "." } else { directory };
            format!("  + {}/README.md", directory)
        }
        PipelineEvent::ListingFailed { path } => format!("  ! cannot list {}", path),
        PipelineEvent::LayoutRevised { revision } => format!("  layout revision {}", revision),
        PipelineEvent::StepStarted { index, file } => format!("  [{}] {}", index + 1, file),
        PipelineEvent::StepSkipped { index, file } => {
            format!("  [{}] {} (exists, skipped)", index + 1, file)
        }
        PipelineEvent::StepFailed { index, file, error } => {
            format!("  [{}] {} failed: {}", index + 1, file, error)
        }
        PipelineEvent::StepCompleted { .. } | PipelineEvent::CheckpointSaved { .. } => {
            return None
        }
    };
    Some(line)
}

fn print_report(report: &PipelineReport) {
    println!("Session: {}", report.session_id);
    println!("Documented files: {}", report.documented_files);
    if !report.failed_files.is_empty() {
        println!("Failed files ({}):", report.failed_files.len());
        for file in &report.failed_files {
            println!("  {}", file);
        }
    }
    println!("Files to migrate: {}", report.files_to_migrate);
    println!("Plan steps: {}", report.plan_steps);
    println!(
        "Migrated: {}, already present: {}",
        report.migration.completed.len(),
        report.migration.skipped.len()
    );
    if !report.migration.failed.is_empty() {
        println!("Failed steps ({}):", report.migration.failed.len());
        for file in &report.migration.failed {
            println!("  {}", file);
        }
    }
    println!("Target: {}", report.migration.target_root.display());
}
