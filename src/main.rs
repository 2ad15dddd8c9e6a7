use anyhow::{Context, Result};
use clap::Parser;
use sandexec::catalog::{MemoryCatalog, Question, QuestionCatalog, SqliteCatalog};
use sandexec::config::{Cli, Command, ExecutionArgs, RunArgs, ServeArgs};
use sandexec::server::{self, AppState};
use sandexec::{telemetry, ExecuteRequest, Executor};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Run(args) => run_once(args).await,
    }
}

async fn build_executor(
    execution: &ExecutionArgs,
    catalog: Arc<dyn QuestionCatalog>,
) -> Result<Executor> {
    let settings = execution.settings()?;
    let backend = execution.backend().await?;
    Ok(Executor::new(
        catalog,
        execution.artifact_builder(),
        backend,
        settings,
    ))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let catalog: Arc<dyn QuestionCatalog> = match &args.database {
        Some(path) => {
            info!(path = %path.display(), "opening question catalog");
            Arc::new(
                SqliteCatalog::open(path)
                    .with_context(|| format!("Failed to open catalog at {}", path.display()))?,
            )
        }
        None => {
            info!("using in-memory question catalog");
            Arc::new(MemoryCatalog::new())
        }
    };

    let executor = build_executor(&args.execution, catalog).await?;
    let state = Arc::new(AppState::new(Arc::new(executor)));
    server::start_server(args.listen, state).await
}

async fn run_once(args: RunArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.question)
        .with_context(|| format!("Failed to read {}", args.question.display()))?;
    let question: Question =
        serde_json::from_str(&raw).context("Question file is not a valid question definition")?;
    question.validate()?;

    let source = std::fs::read_to_string(&args.source)
        .with_context(|| format!("Failed to read {}", args.source.display()))?;
    let arguments: Vec<serde_json::Value> =
        serde_json::from_str(&args.args).context("--args must be a JSON array")?;

    let code = question.code;
    let catalog = Arc::new(MemoryCatalog::with_questions([question]));
    let executor = build_executor(&args.execution, catalog).await?;

    let outcome = executor
        .execute(ExecuteRequest {
            source,
            language: args.language,
            question_code: code,
            arguments,
        })
        .await?;

    println!("{}", outcome.output_text());
    if !outcome.succeeded() {
        anyhow::bail!(
            "run finished in phase {:?}{}",
            outcome.phase,
            outcome
                .reason
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
    }
    Ok(())
}
