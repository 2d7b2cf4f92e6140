//! CLI command definitions

use crate::execution::SchedulingStrategy;
use crate::runner::ExecutorConfig;
use clap::Args;
use std::path::PathBuf;

/// Options shared by every command that executes runs
#[derive(Debug, Args, Clone)]
pub struct ExecOptions {
    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Cap on concurrently running job instances (implies parallel-limited)
    #[arg(long)]
    pub max_jobs: Option<usize>,

    /// Shell used for `run` steps
    #[arg(long, default_value = "sh")]
    pub shell: String,

    /// Command standing in for a `uses` action (action=command)
    #[arg(long, value_parser = parse_key_value)]
    pub action: Vec<(String, String)>,

    /// Treat actions without a mapped command as no-ops
    #[arg(long)]
    pub ignore_unknown_actions: bool,

    /// Working directory for steps and relative artifact paths
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}

impl ExecOptions {
    pub fn strategy(&self) -> SchedulingStrategy {
        match self.max_jobs {
            Some(max) => SchedulingStrategy::LimitedParallel(max),
            None => self.strategy.into(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::new()
            .with_shell(self.shell.clone())
            .with_ignore_unknown_actions(self.ignore_unknown_actions);
        for (action, command) in &self.action {
            config = config.with_action(action.clone(), command.clone());
        }
        if let Some(dir) = &self.workdir {
            config = config.with_working_dir(dir.clone());
        }
        config
    }
}

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Git ref the run applies to
    #[arg(long = "ref", default_value = "refs/heads/main")]
    pub git_ref: String,

    /// Repository identity
    #[arg(long, default_value = "local/workspace")]
    pub repository: String,

    /// Who requested the run
    #[arg(long)]
    pub actor: Option<String>,

    #[command(flatten)]
    pub exec: ExecOptions,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Poll cron triggers
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Seconds between polls
    #[arg(long, default_value_t = 30)]
    pub poll_interval: u64,

    /// Wait for the next tick, run once, and exit
    #[arg(long)]
    pub once: bool,

    /// Git ref scheduled runs apply to
    #[arg(long = "ref", default_value = "refs/heads/main")]
    pub git_ref: String,

    /// Repository identity
    #[arg(long, default_value = "local/workspace")]
    pub repository: String,

    #[command(flatten)]
    pub exec: ExecOptions,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List artifacts of a run
#[derive(Debug, Args, Clone)]
pub struct ArtifactsCommand {
    /// Run ID
    #[arg(long)]
    pub run: String,

    /// Show only the artifact with this name
    #[arg(long)]
    pub name: Option<String>,

    /// Delete expired artifacts under the data directory first
    #[arg(long)]
    pub prune: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
