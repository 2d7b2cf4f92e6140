//! Shell executor - runs step commands as subprocesses

use crate::core::job::StepAction;
use crate::runner::{CommandExecutor, CommandOutput, ExecError, ExecutorConfig, Invocation};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Executor that runs each step through a local shell
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    config: ExecutorConfig,
}

impl ShellExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Resolve the shell command and extra env for an invocation.
    ///
    /// Returns `None` for actions that are skipped as no-ops.
    fn resolve(
        &self,
        action: &StepAction,
    ) -> Result<Option<(String, BTreeMap<String, String>)>, ExecError> {
        match action {
            StepAction::Run(command) => Ok(Some((command.clone(), BTreeMap::new()))),
            StepAction::Uses { action, with } => match self.config.action_command(action) {
                Some(command) => {
                    let inputs = with
                        .iter()
                        .map(|(key, value)| (input_var(key), value.clone()))
                        .collect();
                    Ok(Some((command.to_string(), inputs)))
                }
                None if self.config.ignore_unknown_actions => Ok(None),
                None => Err(ExecError::UnknownAction(action.clone())),
            },
        }
    }
}

/// `retention-days` → `INPUT_RETENTION_DAYS`
fn input_var(key: &str) -> String {
    format!("INPUT_{}", key.replace([' ', '-'], "_").to_uppercase())
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let Some((command, inputs)) = self.resolve(&invocation.action)? else {
            debug!(
                "No command configured for {}, treating as no-op",
                invocation.describe()
            );
            return Ok(CommandOutput::success());
        };

        debug!(
            "Spawning {} for step {} of {}",
            self.config.shell, invocation.step_id, invocation.instance
        );

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&command)
            .envs(&invocation.env)
            .envs(&inputs)
            .kill_on_drop(true);

        if let Some(dir) = invocation
            .working_dir
            .as_ref()
            .or(self.config.working_dir.as_ref())
        {
            cmd.current_dir(dir);
        }

        let limit = invocation
            .timeout
            .or(self.config.default_timeout_secs.map(Duration::from_secs));

        let output = match limit {
            Some(limit) => timeout(limit, cmd.output())
                .await
                .map_err(|_| ExecError::Timeout(limit.as_secs()))?,
            None => cmd.output().await,
        }
        .map_err(|e| ExecError::Spawn(format!("{}: {}", self.config.shell, e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_code != 0 {
            warn!(
                "Step {} of {} exited with code {}: {}",
                invocation.step_id,
                invocation.instance,
                exit_code,
                stderr.trim()
            );
        }

        debug!("Step {} returned {} bytes of output", invocation.step_id, stdout.len());

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}
