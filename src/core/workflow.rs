//! Workflow domain model

use crate::core::{
    job::JobTemplate,
    trigger::{Trigger, TriggerEvaluator},
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Workflow-wide behavior switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Treat a cancelled prerequisite as a failure for `failure()`
    pub cancelled_counts_as_failure: bool,
}

/// A validated workflow definition, immutable during a run
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,

    pub triggers: Vec<Trigger>,

    /// Workflow-level environment, lowest precedence
    pub env: BTreeMap<String, String>,

    pub settings: WorkflowSettings,

    /// Job templates in declaration order
    pub jobs: Vec<JobTemplate>,
}

impl Workflow {
    /// Assemble a workflow from already-validated parts
    pub fn new(
        name: impl Into<String>,
        triggers: Vec<Trigger>,
        env: BTreeMap<String, String>,
        settings: WorkflowSettings,
        jobs: Vec<JobTemplate>,
    ) -> Self {
        Self {
            name: name.into(),
            triggers,
            env,
            settings,
            jobs,
        }
    }

    /// Get a job template by id
    pub fn job(&self, id: &str) -> Option<&JobTemplate> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn accepts_dispatch(&self) -> bool {
        self.triggers
            .iter()
            .any(|t| matches!(t, Trigger::ManualDispatch))
    }

    /// Build a trigger evaluator that ignores ticks at or before `start`
    pub fn trigger_evaluator(&self, start: DateTime<Utc>) -> TriggerEvaluator {
        TriggerEvaluator::new(self.name.clone(), self.triggers.clone(), start)
    }
}
