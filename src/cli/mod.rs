//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ArtifactsCommand, HistoryCommand, RunCommand, ScheduleCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Failure-isolating CI workflow orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "fallback-ci")]
#[command(version)]
#[command(about = "Run CI workflows with gated fallback jobs and failure artifacts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for run history and artifacts
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a workflow once, as a manual dispatch
    Run(RunCommand),

    /// Validate a workflow file
    Validate(ValidateCommand),

    /// Poll the workflow's cron triggers and start a run per tick
    Schedule(ScheduleCommand),

    /// Show run history
    History(HistoryCommand),

    /// List artifacts captured by a run
    Artifacts(ArtifactsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Data directory, defaulting to `<local data dir>/fallback-ci`
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("fallback-ci")
        })
    }
}
