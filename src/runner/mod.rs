//! External command collaborator
//!
//! The orchestration core never runs a test framework itself. Everything a
//! step does (an inline `run:` command or a named `uses:` action) is handed
//! to a [`CommandExecutor`], which reports an exit code and captured output.

pub mod config;
pub mod invocation;
pub mod shell;

use async_trait::async_trait;
pub use config::ExecutorConfig;
pub use invocation::{CommandOutput, ExecError, Invocation};
pub use shell::ShellExecutor;

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one step invocation to completion
    ///
    /// A non-zero exit is not an error: it is reported through
    /// [`CommandOutput::exit_code`]. Errors are reserved for invocations that
    /// could not run at all.
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}
