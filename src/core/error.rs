//! Configuration error taxonomy
//!
//! Everything in here is detected before a single job instance starts. A
//! workflow that fails to build never produces a run.

use thiserror::Error;

/// A workflow declaration that cannot be executed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Workflow declares no jobs")]
    NoJobs,

    #[error("Workflow declares no triggers")]
    NoTriggers,

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Job '{job}' needs non-existent job '{need}'")]
    UnknownNeed { job: String, need: String },

    #[error("Cycle detected in job dependencies involving '{0}'")]
    Cycle(String),

    #[error("Malformed condition on {location}: '{expression}': {reason}")]
    MalformedCondition {
        location: String,
        expression: String,
        reason: String,
    },

    #[error("Condition on {location} references job '{job}' which is not in its needs")]
    UnreachableReference { location: String, job: String },

    #[error("Invalid matrix for job '{job}': {reason}")]
    InvalidMatrix { job: String, reason: String },

    #[error("Step {index} of job '{job}' must declare exactly one of 'run' or 'uses'")]
    InvalidStepAction { job: String, index: usize },

    #[error("Duplicate step id '{step}' in job '{job}'")]
    DuplicateStepId { job: String, step: String },

    #[error("Invalid artifact step in job '{job}': {reason}")]
    InvalidArtifactStep { job: String, reason: String },

    #[error("Output '{output}' of job '{job}' references unknown step '{step}'")]
    UnknownOutputStep {
        job: String,
        output: String,
        step: String,
    },

    #[error("Invalid value for '{key}' in {location}: {reason}")]
    InvalidValue {
        location: String,
        key: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn malformed(
        location: impl Into<String>,
        expression: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::MalformedCondition {
            location: location.into(),
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}
