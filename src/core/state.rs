//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Terminal status of a job instance, as observed by downstream conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    /// Parse a status literal. Accepts both the workflow spelling
    /// (`success`, `failure`) and the lifecycle spelling (`succeeded`, `failed`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" => Some(JobStatus::Succeeded),
            "failure" | "failed" => Some(JobStatus::Failed),
            "skipped" => Some(JobStatus::Skipped),
            "cancelled" | "canceled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "success",
            JobStatus::Failed => "failure",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Fold the statuses of every instance of one template into the result
    /// exposed as `needs.<template>.result`.
    ///
    /// Zero instances (an empty matrix axis) aggregate to skipped.
    pub fn aggregate<I>(statuses: I) -> JobStatus
    where
        I: IntoIterator<Item = JobStatus>,
    {
        let mut any = false;
        let mut all_skipped = true;
        let mut cancelled = false;

        for status in statuses {
            any = true;
            match status {
                JobStatus::Failed => return JobStatus::Failed,
                JobStatus::Cancelled => cancelled = true,
                JobStatus::Succeeded => all_skipped = false,
                JobStatus::Skipped => {}
            }
        }

        if cancelled {
            JobStatus::Cancelled
        } else if !any || all_skipped {
            JobStatus::Skipped
        } else {
            JobStatus::Succeeded
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting on prerequisites
    Pending,
    /// Every prerequisite is terminal; the condition gate has not run yet
    Eligible,
    /// Steps are executing
    Running { started_at: DateTime<Utc> },
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        failed_step: Option<String>,
    },
    /// The condition gate evaluated false; no step ran
    Skipped { reason: String },
    /// Terminated by a fail-fast sibling
    Cancelled { reason: String },
}

impl JobState {
    /// Check if the instance is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status().is_some()
    }

    /// Terminal status, `None` while the instance is still in flight
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            JobState::Succeeded { .. } => Some(JobStatus::Succeeded),
            JobState::Failed { .. } => Some(JobStatus::Failed),
            JobState::Skipped { .. } => Some(JobStatus::Skipped),
            JobState::Cancelled { .. } => Some(JobStatus::Cancelled),
            JobState::Pending | JobState::Eligible | JobState::Running { .. } => None,
        }
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Best-effort work (artifact capture) that did not complete
    Warning,
    /// Interrupted by cancellation of the instance
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "success",
            StepStatus::Failed => "failure",
            StepStatus::Skipped => "skipped",
            StepStatus::Warning => "warning",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

/// Recorded result of one step of one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step id (explicit `id:` or positional)
    pub id: String,

    /// Human-readable step name
    pub name: String,

    pub status: StepStatus,

    /// Exit code of the external command, when one ran
    pub exit_code: Option<i32>,

    /// Failure or warning detail
    pub message: Option<String>,

    /// Whether a failure of this step fails the instance (false for `always()` steps)
    pub counts_toward_status: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// True when this step marks the instance as failed so far
    pub fn is_counted_failure(&self) -> bool {
        self.counts_toward_status && self.status == StepStatus::Failed
    }
}

/// Overall workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Run is currently executing instances
    Running,
    /// No instance failed
    Succeeded,
    /// At least one instance failed
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current run status
    pub status: RunStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of job instances after matrix expansion
    pub total_instances: usize,

    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunState {
    /// Create a new run state
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            total_instances: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_instances: usize) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_instances = total_instances;
    }

    /// Count one terminal instance
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Close the run. Skipped and cancelled instances never fail it.
    pub fn finish(&mut self) {
        self.status = if self.failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        self.completed_at = Some(Utc::now());
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
