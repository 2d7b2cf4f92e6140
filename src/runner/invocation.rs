//! Invocation and result types

use crate::core::job::StepAction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error types for command execution
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("No command configured for action '{0}'")]
    UnknownAction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One fully rendered step, ready to hand to an executor
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Display name of the job instance
    pub instance: String,

    /// Step id within the instance
    pub step_id: String,

    /// What to run, matrix placeholders already substituted
    pub action: StepAction,

    /// Merged environment (workflow < job < step, plus event and matrix)
    pub env: BTreeMap<String, String>,

    pub working_dir: Option<PathBuf>,

    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match &self.action {
            StepAction::Run(command) => command.lines().next().unwrap_or_default().to_string(),
            StepAction::Uses { action, .. } => action.clone(),
        }
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Process exit code, `-1` when killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output() {
        assert!(CommandOutput::success().succeeded());

        let failed = CommandOutput::failure(2, "boom");
        assert!(!failed.succeeded());
        assert_eq!(failed.stderr, "boom");
    }

    #[test]
    fn test_describe() {
        let invocation = Invocation {
            instance: "check".to_string(),
            step_id: "run".to_string(),
            action: StepAction::Run("make test\nmake lint".to_string()),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        };
        assert_eq!(invocation.describe(), "make test");
    }
}
