//! Test utility functions for fallback-ci

#![allow(dead_code)]

use fallback_ci::core::config::WorkflowConfig;
use fallback_ci::core::job::StepAction;
use fallback_ci::core::{EventMetadata, JobState, JobStatus, StepStatus, TriggerKind, Workflow};
use fallback_ci::execution::{
    EngineConfig, ExecutionEngine, ExecutionEvent, InstanceRecord, RunReport, SchedulingStrategy,
};
use fallback_ci::runner::{CommandExecutor, CommandOutput, ExecError, Invocation};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock answers a command
#[derive(Debug, Clone)]
pub struct Scripted {
    pub exit_code: i32,
    pub delay: Option<Duration>,
}

/// One call the mock received
#[derive(Debug, Clone)]
pub struct Call {
    pub seq: u64,
    pub instance: String,
    pub step_id: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
}

/// Mock executor with scripted exit codes.
///
/// Rules match when the rendered command (or action name) contains the
/// pattern; the first matching rule wins and anything unmatched succeeds.
#[derive(Clone, Default)]
pub struct MockExecutor {
    rules: Arc<Vec<(String, Scripted)>>,
    calls: Arc<Mutex<Vec<Call>>>,
    seq: Arc<AtomicU64>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` for commands containing `pattern`
    pub fn exit(mut self, pattern: &str, code: i32) -> Self {
        Arc::make_mut(&mut self.rules).push((
            pattern.to_string(),
            Scripted {
                exit_code: code,
                delay: None,
            },
        ));
        self
    }

    /// Fail commands containing `pattern`
    pub fn fail(self, pattern: &str) -> Self {
        self.exit(pattern, 1)
    }

    /// Sleep before answering commands containing `pattern`
    pub fn delay(mut self, pattern: &str, delay: Duration, code: i32) -> Self {
        Arc::make_mut(&mut self.rules).push((
            pattern.to_string(),
            Scripted {
                exit_code: code,
                delay: Some(delay),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made for one instance, in order
    pub fn calls_for(&self, instance: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.instance == instance)
            .collect()
    }

    /// Whether any call's command contained `pattern`
    pub fn ran(&self, pattern: &str) -> bool {
        self.calls().iter().any(|call| call.command.contains(pattern))
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let command = match &invocation.action {
            StepAction::Run(command) => command.clone(),
            StepAction::Uses { action, .. } => action.clone(),
        };

        self.calls.lock().unwrap().push(Call {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            instance: invocation.instance.clone(),
            step_id: invocation.step_id.clone(),
            command: command.clone(),
            env: invocation.env.clone(),
        });

        let rule = self
            .rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, scripted)| scripted.clone());

        let Some(rule) = rule else {
            return Ok(CommandOutput::success());
        };

        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }

        if rule.exit_code == 0 {
            Ok(CommandOutput::success())
        } else {
            Ok(CommandOutput::failure(rule.exit_code, format!("{} failed", command)))
        }
    }
}

/// Parse and validate a workflow
pub fn workflow(yaml: &str) -> Workflow {
    WorkflowConfig::from_yaml(yaml)
        .expect("workflow should parse")
        .to_workflow()
        .expect("workflow should validate")
}

/// Event for a manual dispatch on the default branch
pub fn dispatch_event() -> EventMetadata {
    EventMetadata {
        kind: TriggerKind::ManualDispatch,
        git_ref: "refs/heads/main".to_string(),
        repository: "acme/suite".to_string(),
        actor: Some("tester".to_string()),
        scheduled_for: None,
        received_at: Utc::now(),
    }
}

/// Result of a run plus every event the engine emitted
pub struct RunResult {
    pub report: RunReport,
    pub events: Vec<ExecutionEvent>,
}

impl RunResult {
    pub fn instance(&self, name: &str) -> &InstanceRecord {
        self.report
            .instance(name)
            .unwrap_or_else(|| panic!("Instance '{}' not found in report", name))
    }

    pub fn status_of(&self, name: &str) -> JobStatus {
        self.instance(name)
            .status()
            .unwrap_or_else(|| panic!("Instance '{}' is not terminal", name))
    }

    pub fn template_status(&self, template: &str) -> JobStatus {
        self.report
            .template_status(template)
            .unwrap_or_else(|| panic!("Template '{}' has no aggregate", template))
    }

    pub fn step_status(&self, instance: &str, step_id: &str) -> StepStatus {
        self.instance(instance)
            .steps
            .iter()
            .find(|step| step.id == step_id)
            .map(|step| step.status)
            .unwrap_or_else(|| panic!("Step '{}' not recorded for '{}'", step_id, instance))
    }

    /// Instance names in the order they were admitted (started or skipped)
    pub fn admission_order(&self) -> Vec<String> {
        let mut admitted: Vec<(u64, String)> = self
            .report
            .instances
            .iter()
            .filter_map(|i| i.admitted_seq.map(|seq| (seq, i.name.clone())))
            .collect();
        admitted.sort();
        admitted.into_iter().map(|(_, name)| name).collect()
    }
}

/// Run a workflow with the mock, artifacts going under `artifact_root`
pub async fn run_workflow(
    workflow: &Workflow,
    executor: MockExecutor,
    artifact_root: &Path,
) -> RunResult {
    run_workflow_with(workflow, executor, artifact_root, SchedulingStrategy::Parallel).await
}

pub async fn run_workflow_with(
    workflow: &Workflow,
    executor: MockExecutor,
    artifact_root: &Path,
    strategy: SchedulingStrategy,
) -> RunResult {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let engine = ExecutionEngine::new(
        executor,
        EngineConfig::new(artifact_root).with_strategy(strategy),
    )
    .with_event_handler(move |event| sink.lock().unwrap().push(event));

    let report = engine
        .execute(workflow, dispatch_event())
        .await
        .expect("run should complete");

    let events = events.lock().unwrap().clone();
    RunResult { report, events }
}

/// Assert every instance ended in a terminal state
pub fn assert_all_terminal(result: &RunResult) {
    for instance in &result.report.instances {
        assert!(
            instance.state.is_terminal(),
            "Instance '{}' is not terminal: {:?}",
            instance.name,
            instance.state
        );
    }
}

/// Assert an instance was skipped without running any step
pub fn assert_skipped(result: &RunResult, name: &str) {
    let instance = result.instance(name);
    assert!(
        matches!(instance.state, JobState::Skipped { .. }),
        "Instance '{}' should be skipped, but was {:?}",
        name,
        instance.state
    );
    assert!(instance.steps.is_empty(), "Skipped instance '{}' ran steps", name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_executor_rules() {
        let mock = MockExecutor::new().fail("pytest").exit("lint", 2);

        let invocation = |cmd: &str| Invocation {
            instance: "check".to_string(),
            step_id: "run".to_string(),
            action: StepAction::Run(cmd.to_string()),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        };

        assert_eq!(mock.execute(&invocation("pytest -x")).await.unwrap().exit_code, 1);
        assert_eq!(mock.execute(&invocation("make lint")).await.unwrap().exit_code, 2);
        assert!(mock.execute(&invocation("make")).await.unwrap().succeeded());
        assert_eq!(mock.calls().len(), 3);
        assert!(mock.ran("lint"));
    }
}
