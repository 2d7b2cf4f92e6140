//! Workflow execution: instance graph, admission, step running and artifacts

pub mod artifacts;
pub mod engine;
pub mod executor;
pub mod scheduler;

pub use artifacts::{Artifact, ArtifactArchiver, ArtifactError, ArtifactRequest};
pub use engine::{
    EngineConfig, EngineError, EventHandler, EventSink, ExecutionEngine, ExecutionEvent,
    InstanceRecord, RunReport,
};
pub use executor::{CancelSignal, InstanceContext, InstanceOutcome, JobRunner};
pub use scheduler::{ExecutionScheduler, JobGraph, JobInstance, SchedulingStrategy};
