//! Executor configuration

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for the shell executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell used for `run:` commands, invoked as `<shell> -c <command>`
    pub shell: String,

    /// Timeout for steps that declare none, in seconds
    pub default_timeout_secs: Option<u64>,

    /// Command run for each named `uses:` action (keyed without `@ref`)
    pub actions: HashMap<String, String>,

    /// Treat actions with no configured command as succeeded no-ops
    pub ignore_unknown_actions: bool,

    /// Working directory for every command
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            default_timeout_secs: None,
            actions: HashMap::new(),
            ignore_unknown_actions: false,
            working_dir: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>, command: impl Into<String>) -> Self {
        self.actions.insert(action.into(), command.into());
        self
    }

    pub fn with_ignore_unknown_actions(mut self, ignore: bool) -> Self {
        self.ignore_unknown_actions = ignore;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Command configured for `action`, matching with or without its `@ref`
    pub fn action_command(&self, action: &str) -> Option<&str> {
        self.actions
            .get(action)
            .or_else(|| {
                action
                    .split_once('@')
                    .and_then(|(name, _)| self.actions.get(name))
            })
            .map(String::as_str)
    }
}
