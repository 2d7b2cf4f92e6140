//! Test: step conditions inside one instance

use crate::helpers::*;
use fallback_ci::core::{JobStatus, StepStatus};

#[tokio::test]
async fn test_no_success_step_runs_after_failure() {
    let yaml = r#"
name: steps
on:
  workflow_dispatch:
jobs:
  check:
    steps:
      - id: setup
        run: setup
      - id: tests
        run: run-tests
      - id: report
        run: publish-report
      - id: on-failure
        if: failure()
        run: collect-logs
      - id: cleanup
        if: always()
        run: cleanup
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new().fail("run-tests");

    let result = run_workflow(&workflow(yaml), mock.clone(), dir.path()).await;

    assert_eq!(result.status_of("check"), JobStatus::Failed);
    assert_eq!(result.step_status("check", "setup"), StepStatus::Succeeded);
    assert_eq!(result.step_status("check", "tests"), StepStatus::Failed);
    assert_eq!(result.step_status("check", "report"), StepStatus::Skipped);
    assert_eq!(result.step_status("check", "on-failure"), StepStatus::Succeeded);
    assert_eq!(result.step_status("check", "cleanup"), StepStatus::Succeeded);

    let commands: Vec<String> = mock.calls_for("check").into_iter().map(|c| c.command).collect();
    assert_eq!(commands, vec!["setup", "run-tests", "collect-logs", "cleanup"]);
}

#[tokio::test]
async fn test_failure_steps_skipped_on_success() {
    let yaml = r#"
name: steps
on:
  workflow_dispatch:
jobs:
  check:
    steps:
      - id: tests
        run: run-tests
      - id: on-failure
        if: failure()
        run: collect-logs
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new();

    let result = run_workflow(&workflow(yaml), mock.clone(), dir.path()).await;

    assert_eq!(result.status_of("check"), JobStatus::Succeeded);
    assert_eq!(result.step_status("check", "on-failure"), StepStatus::Skipped);
    assert!(!mock.ran("collect-logs"));
}

#[tokio::test]
async fn test_always_step_failure_does_not_fail_instance() {
    let yaml = r#"
name: steps
on:
  workflow_dispatch:
jobs:
  check:
    steps:
      - id: tests
        run: run-tests
      - id: cleanup
        if: always()
        run: cleanup
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new().fail("cleanup");

    let result = run_workflow(&workflow(yaml), mock, dir.path()).await;

    assert_eq!(result.step_status("check", "cleanup"), StepStatus::Failed);
    assert_eq!(result.status_of("check"), JobStatus::Succeeded);
}
