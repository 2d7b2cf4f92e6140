//! Step runner - executes the steps of one job instance

use crate::{
    core::{
        condition::GateScope,
        context::ContextSnapshot,
        job::{render_matrix, JobTemplate, StepAction, StepSpec},
        state::{JobStatus, StepRecord, StepStatus},
    },
    execution::{
        artifacts::{Artifact, ArtifactArchiver, ArtifactRequest},
        engine::{EventSink, ExecutionEvent},
        scheduler::JobInstance,
    },
    runner::{CommandExecutor, Invocation},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cancellation signal shared by the instances of one matrix group
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self::default()
    }

    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the group is cancelled; pends forever otherwise
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Everything an instance task needs, owned
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub run_id: Uuid,
    pub template: Arc<JobTemplate>,
    pub instance: JobInstance,

    /// Event and workflow environment, lowest precedence
    pub base_env: BTreeMap<String, String>,

    /// Published outputs at admission time
    pub snapshot: ContextSnapshot,

    pub working_dir: Option<PathBuf>,
}

impl InstanceContext {
    /// Environment for one step: base < job < matrix < step
    fn step_env(&self, step: &StepSpec) -> BTreeMap<String, String> {
        let matrix = &self.instance.matrix;
        let mut env = self.base_env.clone();

        for (key, value) in &self.template.env {
            env.insert(key.clone(), render_matrix(value, matrix));
        }
        for (axis, value) in matrix {
            env.insert(matrix_var(axis), value.clone());
        }
        for (key, value) in &step.env {
            env.insert(key.clone(), render_matrix(value, matrix));
        }

        env
    }

    fn render_action(&self, action: &StepAction) -> StepAction {
        let matrix = &self.instance.matrix;
        match action {
            StepAction::Run(command) => StepAction::Run(render_matrix(command, matrix)),
            StepAction::Uses { action, with } => StepAction::Uses {
                action: action.clone(),
                with: with
                    .iter()
                    .map(|(key, value)| (key.clone(), render_matrix(value, matrix)))
                    .collect(),
            },
        }
    }
}

/// `python-version` → `MATRIX_PYTHON_VERSION`
fn matrix_var(axis: &str) -> String {
    let normalized: String = axis
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("MATRIX_{}", normalized)
}

/// Terminal result of one instance task
#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    pub status: JobStatus,
    pub steps: Vec<StepRecord>,
    pub failed_step: Option<String>,
    pub artifacts: Vec<Artifact>,
}

/// Runs the steps of job instances
pub struct JobRunner<E> {
    executor: Arc<E>,
    archiver: Arc<ArtifactArchiver>,
    events: EventSink,
}

impl<E: CommandExecutor + 'static> JobRunner<E> {
    pub fn new(executor: Arc<E>, archiver: Arc<ArtifactArchiver>, events: EventSink) -> Self {
        Self {
            executor,
            archiver,
            events,
        }
    }

    /// Execute every step of an instance, strictly in order
    pub async fn run(&self, ctx: InstanceContext, mut cancel: CancelSignal) -> InstanceOutcome {
        let name = ctx.instance.name.clone();
        info!("Running job instance: {}", name);

        let mut records: Vec<StepRecord> = Vec::with_capacity(ctx.template.steps.len());
        let mut artifacts = Vec::new();
        let mut failed_step = None;

        for step in &ctx.template.steps {
            if cancel.is_cancelled() {
                return cancelled(records, artifacts);
            }

            let scope = GateScope::for_steps(failed_step.is_some());
            let started_at = Utc::now();

            if !step.condition.evaluate(&scope, &ctx.snapshot) {
                debug!("Skipping step {} of {}: condition '{}' is false", step.id, name, step.condition);
                let record = StepRecord {
                    id: step.id.clone(),
                    name: step.name.clone(),
                    status: StepStatus::Skipped,
                    exit_code: None,
                    message: None,
                    counts_toward_status: step.counts_toward_status(),
                    started_at,
                    finished_at: started_at,
                };
                self.emit_step(&name, &record);
                records.push(record);
                continue;
            }

            self.events.emit(ExecutionEvent::StepStarted {
                instance: name.clone(),
                step_id: step.id.clone(),
                name: step.name.clone(),
            });

            let action = ctx.render_action(&step.action);

            let (status, exit_code, message) = if step.is_artifact_capture() {
                match self.capture(&ctx, &action).await {
                    Ok(artifact) => {
                        let message = format!("captured {}", artifact.stored_at.display());
                        self.events.emit(ExecutionEvent::ArtifactCaptured {
                            instance: name.clone(),
                            artifact: artifact.clone(),
                        });
                        artifacts.push(artifact);
                        (StepStatus::Succeeded, None, Some(message))
                    }
                    Err(e) => {
                        warn!("Artifact capture failed for {}: {}", name, e);
                        (StepStatus::Warning, None, Some(e))
                    }
                }
            } else {
                let invocation = Invocation {
                    instance: name.clone(),
                    step_id: step.id.clone(),
                    action,
                    env: ctx.step_env(step),
                    working_dir: ctx.working_dir.clone(),
                    timeout: step.timeout,
                };

                let result = tokio::select! {
                    result = self.executor.execute(&invocation) => result,
                    _ = cancel.cancelled() => {
                        info!("Job instance {} cancelled during step {}", name, step.id);
                        let record = StepRecord {
                            id: step.id.clone(),
                            name: step.name.clone(),
                            status: StepStatus::Cancelled,
                            exit_code: None,
                            message: Some("cancelled by fail-fast".to_string()),
                            counts_toward_status: step.counts_toward_status(),
                            started_at,
                            finished_at: Utc::now(),
                        };
                        self.emit_step(&name, &record);
                        records.push(record);
                        return cancelled(records, artifacts);
                    }
                };

                match result {
                    Ok(output) if output.succeeded() => (StepStatus::Succeeded, Some(0), None),
                    Ok(output) => {
                        let stderr = output.stderr.trim();
                        let message = if stderr.is_empty() {
                            format!("exited with code {}", output.exit_code)
                        } else {
                            stderr.lines().last().unwrap_or_default().to_string()
                        };
                        (StepStatus::Failed, Some(output.exit_code), Some(message))
                    }
                    Err(e) => (StepStatus::Failed, None, Some(e.to_string())),
                }
            };

            let record = StepRecord {
                id: step.id.clone(),
                name: step.name.clone(),
                status,
                exit_code,
                message,
                counts_toward_status: step.counts_toward_status(),
                started_at,
                finished_at: Utc::now(),
            };

            if record.is_counted_failure() && failed_step.is_none() {
                warn!("Step {} of {} failed", step.id, name);
                failed_step = Some(step.id.clone());
            }

            self.emit_step(&name, &record);
            records.push(record);
        }

        let status = if failed_step.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };

        InstanceOutcome {
            status,
            steps: records,
            failed_step,
            artifacts,
        }
    }

    async fn capture(&self, ctx: &InstanceContext, action: &StepAction) -> Result<Artifact, String> {
        let StepAction::Uses { with, .. } = action else {
            return Err("not an artifact step".to_string());
        };
        let request = ArtifactRequest::from_inputs(with).map_err(|e| e.to_string())?;

        let archiver = self.archiver.clone();
        let run_id = ctx.run_id;
        let instance = ctx.instance.name.clone();
        let working_dir = ctx.working_dir.clone();

        tokio::task::spawn_blocking(move || {
            archiver.capture(run_id, &instance, &request, working_dir.as_deref(), Utc::now())
        })
        .await
        .map_err(|e| format!("capture task failed: {}", e))?
        .map_err(|e| e.to_string())
    }

    fn emit_step(&self, instance: &str, record: &StepRecord) {
        self.events.emit(ExecutionEvent::StepFinished {
            instance: instance.to_string(),
            step_id: record.id.clone(),
            status: record.status,
            message: record.message.clone(),
        });
    }
}

fn cancelled(steps: Vec<StepRecord>, artifacts: Vec<Artifact>) -> InstanceOutcome {
    InstanceOutcome {
        status: JobStatus::Cancelled,
        steps,
        failed_step: None,
        artifacts,
    }
}
