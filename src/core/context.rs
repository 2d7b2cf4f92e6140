//! Run context - event metadata and published job outputs
//!
//! The outputs map is the only channel through which a job observes an
//! earlier one. It is append-only: an instance publishes once, on its terminal
//! transition, and nothing is ever overwritten. Consumers read through an
//! immutable [`ContextSnapshot`].

use crate::core::state::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Which kind of trigger started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    ManualDispatch,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Schedule => "schedule",
            TriggerKind::ManualDispatch => "workflow_dispatch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "schedule" => Some(TriggerKind::Schedule),
            "workflow_dispatch" => Some(TriggerKind::ManualDispatch),
            _ => None,
        }
    }
}

/// Metadata of the event that started a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub kind: TriggerKind,

    /// Git ref the run applies to
    pub git_ref: String,

    /// Repository identity (e.g. `owner/name`)
    pub repository: String,

    /// Who requested a manual dispatch
    pub actor: Option<String>,

    /// Cron tick the run was fired for
    pub scheduled_for: Option<DateTime<Utc>>,

    pub received_at: DateTime<Utc>,
}

impl EventMetadata {
    /// Environment variables describing the event, exported to every step
    pub fn env_vars(&self, run_id: Uuid) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("CI".to_string(), "true".to_string());
        vars.insert("CI_RUN_ID".to_string(), run_id.to_string());
        vars.insert("CI_EVENT_NAME".to_string(), self.kind.as_str().to_string());
        vars.insert("CI_REF".to_string(), self.git_ref.clone());
        vars.insert("CI_REPOSITORY".to_string(), self.repository.clone());
        if let Some(actor) = &self.actor {
            vars.insert("CI_ACTOR".to_string(), actor.clone());
        }
        vars
    }
}

/// Values published by a terminal job instance (or aggregated per template)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub status: JobStatus,

    /// Declared outputs, already evaluated
    pub values: BTreeMap<String, String>,
}

impl JobOutputs {
    pub fn status_only(status: JobStatus) -> Self {
        Self {
            status,
            values: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Outputs for '{0}' were already published")]
    AlreadyPublished(String),
}

/// Immutable view of everything published so far
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    jobs: BTreeMap<String, Arc<JobOutputs>>,
}

impl ContextSnapshot {
    pub fn outputs(&self, job: &str) -> Option<&JobOutputs> {
        self.jobs.get(job).map(Arc::as_ref)
    }

    pub fn status(&self, job: &str) -> Option<JobStatus> {
        self.outputs(job).map(|o| o.status)
    }

    pub fn output(&self, job: &str, key: &str) -> Option<&str> {
        self.outputs(job)
            .and_then(|o| o.values.get(key))
            .map(String::as_str)
    }
}

/// Per-run context owned by the engine
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub event: EventMetadata,
    published: BTreeMap<String, Arc<JobOutputs>>,
}

impl RunContext {
    pub fn new(run_id: Uuid, event: EventMetadata) -> Self {
        Self {
            run_id,
            event,
            published: BTreeMap::new(),
        }
    }

    /// Publish the outputs of a terminal instance or template
    pub fn publish(&mut self, name: &str, outputs: JobOutputs) -> Result<(), ContextError> {
        if self.published.contains_key(name) {
            return Err(ContextError::AlreadyPublished(name.to_string()));
        }
        self.published.insert(name.to_string(), Arc::new(outputs));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&JobOutputs> {
        self.published.get(name).map(Arc::as_ref)
    }

    /// Take an immutable snapshot for a condition gate
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            jobs: self.published.clone(),
        }
    }
}
