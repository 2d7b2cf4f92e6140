//! Main execution engine - orchestrates one workflow run
//!
//! The engine loop is the only writer of the run context. Instance tasks
//! report back through a `JoinSet`; on each terminal transition the loop
//! publishes the instance's outputs, then the template aggregate if the
//! group is complete, and only then releases dependents.

use crate::{
    core::{
        condition::GateScope,
        context::{ContextError, EventMetadata, JobOutputs, RunContext, TriggerKind},
        error::ConfigError,
        job::JobTemplate,
        matrix::MatrixValues,
        state::{JobState, JobStatus, RunState, RunStatus, StepRecord, StepStatus},
        workflow::Workflow,
    },
    execution::{
        artifacts::{Artifact, ArtifactArchiver},
        executor::{CancelSignal, InstanceContext, InstanceOutcome, JobRunner},
        scheduler::{ExecutionScheduler, JobGraph, SchedulingStrategy},
    },
    runner::CommandExecutor,
};
use chrono::Utc;
use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
        trigger: TriggerKind,
    },
    JobStarted {
        instance: String,
        seq: u64,
    },
    JobSkipped {
        instance: String,
        reason: String,
    },
    StepStarted {
        instance: String,
        step_id: String,
        name: String,
    },
    StepFinished {
        instance: String,
        step_id: String,
        status: StepStatus,
        message: Option<String>,
    },
    ArtifactCaptured {
        instance: String,
        artifact: Artifact,
    },
    JobFinished {
        instance: String,
        status: JobStatus,
        seq: u64,
    },
    GroupCancelled {
        template: String,
        failed_instance: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Registered event handlers, shared with instance tasks
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventSink {
    fn push(&mut self, handler: EventHandler) {
        Arc::make_mut(&mut self.handlers).push(handler);
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Run stuck: {0}")]
    Stuck(String),
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: SchedulingStrategy,

    /// Where captured artifacts are stored
    pub artifact_root: PathBuf,

    /// Working directory for commands and relative artifact paths
    pub working_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::default(),
            artifact_root: std::env::temp_dir().join("fallback-ci").join("artifacts"),
            working_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Everything recorded about one job instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord {
    pub template: String,
    pub name: String,
    pub matrix: MatrixValues,
    pub state: JobState,
    pub steps: Vec<StepRecord>,

    /// Declared outputs as published
    pub outputs: BTreeMap<String, String>,

    pub artifacts: Vec<Artifact>,

    /// Sequence number of the admission decision (start or skip)
    pub admitted_seq: Option<u64>,

    /// Sequence number of the terminal transition
    pub finished_seq: Option<u64>,
}

impl InstanceRecord {
    pub fn status(&self) -> Option<JobStatus> {
        self.state.status()
    }
}

/// Result of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub event: EventMetadata,
    pub state: RunState,

    /// Instances in graph order
    pub instances: Vec<InstanceRecord>,

    /// Aggregate result per template, in declaration order
    pub templates: IndexMap<String, JobStatus>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceRecord> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn instances_of<'a>(&'a self, template: &'a str) -> impl Iterator<Item = &'a InstanceRecord> {
        self.instances.iter().filter(move |i| i.template == template)
    }

    pub fn template_status(&self, template: &str) -> Option<JobStatus> {
        self.templates.get(template).copied()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.instances.iter().flat_map(|i| i.artifacts.iter())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Main workflow execution engine
pub struct ExecutionEngine<E> {
    executor: Arc<E>,
    archiver: Arc<ArtifactArchiver>,
    config: EngineConfig,
    events: EventSink,
}

impl<E: CommandExecutor + 'static> ExecutionEngine<E> {
    pub fn new(executor: E, config: EngineConfig) -> Self {
        let archiver = Arc::new(ArtifactArchiver::new(config.artifact_root.clone()));

        Self {
            executor: Arc::new(executor),
            archiver,
            config,
            events: EventSink::default(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.push(Arc::new(handler));
    }

    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.add_event_handler(handler);
        self
    }

    pub fn archiver(&self) -> &ArtifactArchiver {
        &self.archiver
    }

    /// Execute one run of `workflow` for a trigger event
    pub async fn execute(
        &self,
        workflow: &Workflow,
        event: EventMetadata,
    ) -> Result<RunReport, EngineError> {
        let graph = JobGraph::build(workflow)?;
        let run_id = Uuid::new_v4();

        info!(
            "Starting workflow run: {} ({}) via {}",
            workflow.name,
            run_id,
            event.kind.as_str()
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow: workflow.name.clone(),
            trigger: event.kind,
        });

        let mut base_env = event.env_vars(run_id);
        base_env.extend(workflow.env.clone());

        let mut run = Run::new(
            workflow,
            graph,
            RunContext::new(run_id, event),
            self.config.strategy,
            self.events.clone(),
        );
        run.publish_empty_templates()?;

        let runner = Arc::new(JobRunner::new(
            self.executor.clone(),
            self.archiver.clone(),
            self.events.clone(),
        ));
        let mut tasks: JoinSet<InstanceOutcome> = JoinSet::new();
        let mut task_nodes = HashMap::new();

        loop {
            while let Some(node) = run.scheduler.next_admissible(&run.graph) {
                match run.admit(node) {
                    Admission::Start(template, cancel) => {
                        run.scheduler.started(&run.graph, node);
                        let ctx = InstanceContext {
                            run_id,
                            template,
                            instance: run.graph.instance(node).clone(),
                            base_env: base_env.clone(),
                            snapshot: run.context.snapshot(),
                            working_dir: self.config.working_dir.clone(),
                        };
                        let runner = runner.clone();
                        let handle = tasks.spawn(async move { runner.run(ctx, cancel).await });
                        task_nodes.insert(handle.id(), node);
                    }
                    Admission::Skip(reason) => {
                        run.finish(node, JobStatus::Skipped, Some(reason), empty_outcome(JobStatus::Skipped))?;
                    }
                    Admission::Cancel(reason) => {
                        run.finish(node, JobStatus::Cancelled, Some(reason), empty_outcome(JobStatus::Cancelled))?;
                    }
                }
            }

            if tasks.is_empty() {
                if run.records.iter().all(|r| r.state.is_terminal()) {
                    break;
                }
                let waiting: Vec<&str> = run
                    .records
                    .iter()
                    .filter(|r| !r.state.is_terminal())
                    .map(|r| r.name.as_str())
                    .collect();
                error!("No instances running and none admissible; waiting: {:?}", waiting);
                return Err(EngineError::Stuck(waiting.join(", ")));
            }

            let (node, outcome) = match tasks.join_next_with_id().await {
                Some(Ok((id, outcome))) => match task_nodes.remove(&id) {
                    Some(node) => (node, outcome),
                    None => continue,
                },
                Some(Err(join_error)) => match task_nodes.remove(&join_error.id()) {
                    Some(node) => {
                        error!(
                            "Job instance {} task failed: {}",
                            run.graph.instance(node).name,
                            join_error
                        );
                        (node, empty_outcome(JobStatus::Failed))
                    }
                    None => continue,
                },
                None => continue,
            };

            run.scheduler.finished(&run.graph, node);
            let status = outcome.status;
            let detail = match status {
                JobStatus::Cancelled => Some("cancelled by fail-fast".to_string()),
                _ => None,
            };
            run.finish(node, status, detail, outcome)?;
        }

        run.state.finish();
        let status = run.state.status;

        info!("Workflow run finished: {} - {:?}", workflow.name, status);
        self.events.emit(ExecutionEvent::RunCompleted { run_id, status });

        Ok(run.into_report(workflow))
    }
}

fn empty_outcome(status: JobStatus) -> InstanceOutcome {
    InstanceOutcome {
        status,
        steps: Vec::new(),
        failed_step: None,
        artifacts: Vec::new(),
    }
}

enum Admission {
    Start(Arc<JobTemplate>, CancelSignal),
    Skip(String),
    Cancel(String),
}

/// Mutable state of one run, owned by the engine loop
struct Run<'a> {
    workflow: &'a Workflow,
    graph: JobGraph,
    scheduler: ExecutionScheduler,
    context: RunContext,
    state: RunState,
    records: Vec<InstanceRecord>,
    templates: HashMap<String, Arc<JobTemplate>>,
    aggregates: IndexMap<String, JobStatus>,
    cancel_senders: HashMap<String, watch::Sender<bool>>,
    cancelled_groups: HashSet<String>,
    seq: u64,
    events: EventSink,
}

impl<'a> Run<'a> {
    fn new(
        workflow: &'a Workflow,
        graph: JobGraph,
        context: RunContext,
        strategy: SchedulingStrategy,
        events: EventSink,
    ) -> Self {
        let mut scheduler = ExecutionScheduler::new(strategy);
        let mut cancel_senders = HashMap::new();

        for job in &workflow.jobs {
            if let Some(max) = job.max_parallel() {
                scheduler.limit_template(job.id.clone(), max);
            }
            if job.fail_fast() && graph.group(&job.id).len() > 1 {
                let (tx, _rx) = watch::channel(false);
                cancel_senders.insert(job.id.clone(), tx);
            }
        }

        let records = graph
            .nodes()
            .map(|node| {
                let instance = graph.instance(node);
                InstanceRecord {
                    template: instance.template.clone(),
                    name: instance.name.clone(),
                    matrix: instance.matrix.clone(),
                    state: JobState::Pending,
                    steps: Vec::new(),
                    outputs: BTreeMap::new(),
                    artifacts: Vec::new(),
                    admitted_seq: None,
                    finished_seq: None,
                }
            })
            .collect();

        for node in graph.initial_ready() {
            scheduler.enqueue(node);
        }

        let mut state = RunState::new();
        state.run_id = context.run_id;
        state.start(graph.len());

        let templates = workflow
            .jobs
            .iter()
            .map(|job| (job.id.clone(), Arc::new(job.clone())))
            .collect();

        let mut run = Self {
            workflow,
            graph,
            scheduler,
            context,
            state,
            records,
            templates,
            aggregates: IndexMap::new(),
            cancel_senders,
            cancelled_groups: HashSet::new(),
            seq: 0,
            events,
        };
        for node in run.graph.initial_ready() {
            run.records[node.index()].state = JobState::Eligible;
        }
        run
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Templates with zero instances are skipped before anything runs
    fn publish_empty_templates(&mut self) -> Result<(), EngineError> {
        let empty: Vec<String> = self
            .graph
            .groups()
            .filter(|(_, nodes)| nodes.is_empty())
            .map(|(id, _)| id.to_string())
            .collect();

        for id in empty {
            info!("Job {} expands to no instances, skipping", id);
            self.context
                .publish(&id, JobOutputs::status_only(JobStatus::Skipped))?;
            self.aggregates.insert(id, JobStatus::Skipped);
        }
        Ok(())
    }

    /// Run the condition gate for an eligible instance
    fn admit(&mut self, node: NodeIndex) -> Admission {
        let template_id = self.graph.instance(node).template.clone();
        let Some(template) = self.templates.get(&template_id).cloned() else {
            return Admission::Skip(format!("unknown job '{}'", template_id));
        };

        let seq = self.next_seq();
        self.records[node.index()].admitted_seq = Some(seq);

        if self.cancelled_groups.contains(&template_id) {
            return Admission::Cancel("cancelled by fail-fast".to_string());
        }

        let snapshot = self.context.snapshot();
        let scope = GateScope::for_needs(
            &template.needs,
            &snapshot,
            self.workflow.settings.cancelled_counts_as_failure,
        );
        let gate = template.gate();
        if !gate.evaluate(&scope, &snapshot) {
            return Admission::Skip(format!("condition '{}' evaluated to false", gate));
        }

        let name = self.graph.instance(node).name.clone();
        info!("Starting job instance: {}", name);
        self.records[node.index()].state = JobState::Running {
            started_at: Utc::now(),
        };
        self.events.emit(ExecutionEvent::JobStarted {
            instance: name,
            seq,
        });

        let cancel = self
            .cancel_senders
            .get(&template_id)
            .map(|tx| CancelSignal::new(tx.subscribe()))
            .unwrap_or_default();

        Admission::Start(template, cancel)
    }

    /// Record a terminal transition, publish, and release dependents
    fn finish(
        &mut self,
        node: NodeIndex,
        status: JobStatus,
        detail: Option<String>,
        outcome: InstanceOutcome,
    ) -> Result<(), EngineError> {
        let seq = self.next_seq();
        let instance = self.graph.instance(node).clone();
        let now = Utc::now();

        let started_at = match self.records[node.index()].state {
            JobState::Running { started_at } => started_at,
            _ => now,
        };

        let state = match status {
            JobStatus::Succeeded => JobState::Succeeded {
                started_at,
                finished_at: now,
            },
            JobStatus::Failed => JobState::Failed {
                started_at,
                finished_at: now,
                failed_step: outcome.failed_step.clone(),
            },
            JobStatus::Skipped => JobState::Skipped {
                reason: detail.unwrap_or_default(),
            },
            JobStatus::Cancelled => JobState::Cancelled {
                reason: detail.unwrap_or_default(),
            },
        };

        let outputs = match self.templates.get(&instance.template) {
            Some(template) => template.evaluate_outputs(status, &outcome.steps),
            None => BTreeMap::new(),
        };

        self.context.publish(
            &instance.name,
            JobOutputs {
                status,
                values: outputs.clone(),
            },
        )?;

        match &state {
            JobState::Skipped { reason } | JobState::Cancelled { reason } => {
                info!("Job instance {} {}: {}", instance.name, status, reason);
                if status == JobStatus::Skipped {
                    self.events.emit(ExecutionEvent::JobSkipped {
                        instance: instance.name.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            _ => info!("Job instance {} finished: {}", instance.name, status),
        }

        let record = &mut self.records[node.index()];
        record.state = state;
        record.steps = outcome.steps;
        record.artifacts = outcome.artifacts;
        record.outputs = outputs;
        record.finished_seq = Some(seq);

        self.state.record(status);
        self.events.emit(ExecutionEvent::JobFinished {
            instance: instance.name.clone(),
            status,
            seq,
        });

        if status == JobStatus::Failed {
            self.cancel_group(&instance.template, &instance.name);
        }

        self.publish_aggregate_if_complete(&instance.template)?;

        for dependent in self.graph.complete(node) {
            debug!(
                "{} is eligible after {}",
                self.graph.instance(dependent).name,
                instance.name
            );
            self.records[dependent.index()].state = JobState::Eligible;
            self.scheduler.enqueue(dependent);
        }

        Ok(())
    }

    fn cancel_group(&mut self, template: &str, failed_instance: &str) {
        let Some(tx) = self.cancel_senders.get(template) else {
            return;
        };
        if !self.cancelled_groups.insert(template.to_string()) {
            return;
        }

        warn!(
            "Fail-fast: {} failed, cancelling remaining instances of {}",
            failed_instance, template
        );
        tx.send_replace(true);
        self.events.emit(ExecutionEvent::GroupCancelled {
            template: template.to_string(),
            failed_instance: failed_instance.to_string(),
        });
    }

    fn publish_aggregate_if_complete(&mut self, template: &str) -> Result<(), EngineError> {
        let nodes = self.graph.group(template);
        let statuses: Option<Vec<JobStatus>> = nodes
            .iter()
            .map(|node| self.records[node.index()].status())
            .collect();
        let Some(statuses) = statuses else {
            return Ok(());
        };

        let aggregate = JobStatus::aggregate(statuses);
        self.aggregates.insert(template.to_string(), aggregate);

        // A single unparameterized instance already published under the template id
        if self.context.get(template).is_none() {
            let mut values = BTreeMap::new();
            for node in nodes {
                values.extend(self.records[node.index()].outputs.clone());
            }
            self.context
                .publish(template, JobOutputs { status: aggregate, values })?;
        }

        debug!("Job {} aggregated to {}", template, aggregate);
        Ok(())
    }

    fn into_report(self, workflow: &Workflow) -> RunReport {
        let mut templates = IndexMap::new();
        for job in &workflow.jobs {
            if let Some(status) = self.aggregates.get(&job.id) {
                templates.insert(job.id.clone(), *status);
            }
        }

        RunReport {
            run_id: self.context.run_id,
            workflow: workflow.name.clone(),
            event: self.context.event.clone(),
            state: self.state,
            instances: self.records,
            templates,
        }
    }
}
