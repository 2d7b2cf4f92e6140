use anyhow::{bail, Context, Result};
use chrono::Utc;
use fallback_ci::cli::commands::{
    ArtifactsCommand, ExecOptions, HistoryCommand, RunCommand, ScheduleCommand, ValidateCommand,
};
use fallback_ci::cli::output::*;
use fallback_ci::cli::{Cli, Command};
use fallback_ci::core::config::WorkflowConfig;
use fallback_ci::core::{DispatchRequest, EventMetadata, RunStatus, Workflow};
use fallback_ci::execution::{ArtifactArchiver, EngineConfig, ExecutionEngine, RunReport};
use fallback_ci::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use fallback_ci::runner::ShellExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let data_dir = cli.data_dir();

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, &data_dir).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Schedule(cmd) => schedule_workflow(cmd, &data_dir).await?,
        Command::History(cmd) => show_history(cmd, &data_dir).await?,
        Command::Artifacts(cmd) => show_artifacts(cmd, &data_dir)?,
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let config = WorkflowConfig::from_file(file).context("Failed to load workflow")?;
    Ok(config.to_workflow()?)
}

async fn open_store(data_dir: &Path, no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
    persistent_store(data_dir).await
}

#[cfg(feature = "sqlite")]
async fn persistent_store(data_dir: &Path) -> Result<Arc<dyn PersistenceBackend>> {
    let store = fallback_ci::persistence::SqliteRunStore::open(data_dir).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn persistent_store(data_dir: &Path) -> Result<Arc<dyn PersistenceBackend>> {
    tracing::warn!(
        "Built without sqlite support; history under {} is not kept",
        data_dir.display()
    );
    Ok(Arc::new(InMemoryPersistence::new()))
}

fn build_engine(exec: &ExecOptions, data_dir: &Path, quiet: bool) -> ExecutionEngine<ShellExecutor> {
    let mut config = EngineConfig::new(artifact_root(data_dir)).with_strategy(exec.strategy());
    if let Some(dir) = &exec.workdir {
        config = config.with_working_dir(dir.clone());
    }

    let mut engine = ExecutionEngine::new(ShellExecutor::new(exec.executor_config()), config);
    if !quiet {
        engine.add_event_handler(|event| println!("{}", format_execution_event(&event)));
    }
    engine
}

fn artifact_root(data_dir: &Path) -> PathBuf {
    data_dir.join("artifacts")
}

/// Execute one run and record it in history
async fn execute_run(
    engine: &ExecutionEngine<ShellExecutor>,
    workflow: &Workflow,
    event: EventMetadata,
    store: &dyn PersistenceBackend,
    no_history: bool,
) -> Result<RunReport> {
    let report = engine
        .execute(workflow, event)
        .await
        .with_context(|| format!("Run of {} could not complete", workflow.name))?;

    if !no_history {
        store.save_run(&RunSummary::from_report(&report)).await?;
        info!("Run {} saved to history", report.run_id);
    }

    Ok(report)
}

async fn run_workflow(cmd: &RunCommand, data_dir: &Path) -> Result<()> {
    let workflow = load_workflow(&cmd.file)?;
    if !cmd.json {
        println!("{} Loaded workflow: {}", INFO, style(&workflow.name).bold());
    }

    let event = workflow
        .trigger_evaluator(Utc::now())
        .dispatch(DispatchRequest {
            git_ref: cmd.git_ref.clone(),
            repository: cmd.repository.clone(),
            actor: cmd.actor.clone(),
        })?;

    let store = open_store(data_dir, cmd.exec.no_history).await?;
    let engine = build_engine(&cmd.exec, data_dir, cmd.json);

    let report = execute_run(&engine, &workflow, event, store.as_ref(), cmd.exec.no_history).await?;

    if cmd.json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n{}", format_report(&report));
        if !cmd.exec.no_history {
            println!(
                "{} Run saved to history (ID: {})",
                INFO,
                style(report.run_id.to_string()).dim()
            );
        }
    }

    if report.status() == RunStatus::Failed {
        error!("Workflow {} failed", workflow.name);
        std::process::exit(1);
    }

    Ok(())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            println!("  Schedules: {}", style(config.triggers.schedule.len()).cyan());
            println!(
                "  Manual dispatch: {}",
                style(config.triggers.workflow_dispatch).cyan()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn schedule_workflow(cmd: &ScheduleCommand, data_dir: &Path) -> Result<()> {
    let workflow = load_workflow(&cmd.file)?;
    let mut evaluator = workflow
        .trigger_evaluator(Utc::now())
        .with_source(cmd.git_ref.clone(), cmd.repository.clone());

    let Some(first) = evaluator.next_tick() else {
        bail!("Workflow '{}' has no schedule triggers", workflow.name);
    };

    let store = open_store(data_dir, cmd.exec.no_history).await?;
    let engine = build_engine(&cmd.exec, data_dir, false);
    let poll = Duration::from_secs(cmd.poll_interval.max(1));

    println!(
        "{} Watching {} - next run at {}",
        INFO,
        style(&workflow.name).bold(),
        style(first.to_rfc3339()).cyan()
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping scheduler");
                return Ok(());
            }
        }

        let Some(event) = evaluator.poll(Utc::now()) else {
            continue;
        };

        match execute_run(&engine, &workflow, event, store.as_ref(), cmd.exec.no_history).await {
            Ok(report) => println!("\n{}", format_report(&report)),
            Err(e) => error!("{:#}", e),
        }

        if cmd.once {
            return Ok(());
        }
        if let Some(next) = evaluator.next_tick() {
            println!("{} Next run at {}", INFO, style(next.to_rfc3339()).cyan());
        }
    }
}

async fn show_history(cmd: &HistoryCommand, data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir, false).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => println!("{}", format_run_summary(&summary)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.workflow {
        Some(workflow) => store.list_runs(workflow).await?,
        None => {
            let mut all = Vec::new();
            for workflow in store.list_workflows().await? {
                all.extend(store.list_runs(&workflow).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    runs.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn show_artifacts(cmd: &ArtifactsCommand, data_dir: &Path) -> Result<()> {
    let run_id = uuid::Uuid::parse_str(&cmd.run).context("Invalid run ID format")?;
    let archiver = ArtifactArchiver::new(artifact_root(data_dir));

    if cmd.prune {
        let pruned = archiver
            .prune_expired(Utc::now())
            .context("Failed to prune expired artifacts")?;
        if !pruned.is_empty() {
            println!("{} Pruned {} expired artifacts", INFO, pruned.len());
        }
    }

    let mut artifacts = archiver
        .list(run_id)
        .with_context(|| format!("Failed to list artifacts of run {}", run_id))?;
    if let Some(name) = &cmd.name {
        artifacts.retain(|artifact| &artifact.name == name);
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("{} No artifacts for run {}", INFO, style(run_id).dim());
        return Ok(());
    }

    for artifact in &artifacts {
        println!("{}", format_artifact(artifact));
        println!("    {}", style(artifact.stored_at.display()).dim());
    }

    Ok(())
}
