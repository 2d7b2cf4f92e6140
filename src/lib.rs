//! fallback-ci - a CI workflow orchestrator that gates fallback jobs on the
//! outcome of earlier ones and archives artifacts when runs fail

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use self::core::{
    ConfigError, EventMetadata, JobStatus, RunStatus, TriggerEvaluator, TriggerKind, Workflow,
};
pub use execution::{EngineConfig, ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy};
pub use runner::{CommandExecutor, ShellExecutor};
