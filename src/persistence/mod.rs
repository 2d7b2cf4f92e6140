//! Persistence layer for workflow run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{RunStatus, TriggerKind};
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow: String,

    /// What started the run
    pub trigger: TriggerKind,

    /// Final run status
    pub status: RunStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of instances after matrix expansion
    pub total_instances: usize,

    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,

    /// Number of artifacts captured during the run
    pub artifact_count: usize,
}

impl RunSummary {
    /// Create a summary from a finished run
    pub fn from_report(report: &RunReport) -> Self {
        let state = &report.state;
        Self {
            run_id: report.run_id,
            workflow: report.workflow.clone(),
            trigger: report.event.kind,
            status: state.status,
            started_at: state.started_at.unwrap_or(report.event.received_at),
            completed_at: state.completed_at,
            total_instances: state.total_instances,
            succeeded: state.succeeded,
            failed: state.failed,
            skipped: state.skipped,
            cancelled: state.cancelled,
            artifact_count: report.artifacts().count(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary, replacing one with the same ID
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a workflow, newest first
    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>>;

    /// Most recent run of a workflow
    async fn latest_run(&self, workflow: &str) -> Result<Option<RunSummary>>;

    async fn delete_run(&self, run_id: Uuid) -> Result<()>;

    /// List all workflow names with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.workflow == workflow)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn latest_run(&self, workflow: &str) -> Result<Option<RunSummary>> {
        Ok(self.list_runs(workflow).await?.into_iter().next())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        self.runs.write().await.remove(&run_id);
        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|run| run.workflow.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
pub(crate) fn sample_summary(workflow: &str, status: RunStatus) -> RunSummary {
    RunSummary {
        run_id: Uuid::new_v4(),
        workflow: workflow.to_string(),
        trigger: TriggerKind::ManualDispatch,
        status,
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
        total_instances: 3,
        succeeded: 2,
        failed: 1,
        skipped: 0,
        cancelled: 0,
        artifact_count: 1,
    }
}
