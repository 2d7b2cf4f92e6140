//! Test: fail-fast cancellation within a matrix group

use crate::helpers::*;
use fallback_ci::core::{JobStatus, RunStatus};
use fallback_ci::execution::ExecutionEvent;
use std::time::Duration;

fn matrix_workflow(fail_fast: bool, max_parallel: Option<usize>) -> String {
    let max_parallel = max_parallel
        .map(|max| format!("      max-parallel: {}\n", max))
        .unwrap_or_default();
    format!(
        r#"
name: matrix
on:
  workflow_dispatch:
jobs:
  check:
    strategy:
      fail-fast: {}
{}      matrix:
        python: ["3.10", "3.11", "3.12"]
    steps:
      - run: check ${{{{ matrix.python }}}}
"#,
        fail_fast, max_parallel
    )
}

#[tokio::test]
async fn test_fail_fast_cancels_running_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new()
        .fail("check 3.10")
        .delay("check 3.1", Duration::from_secs(5), 0);

    let result = run_workflow(&workflow(&matrix_workflow(true, None)), mock, dir.path()).await;

    assert_all_terminal(&result);
    assert_eq!(result.status_of("check (python=3.10)"), JobStatus::Failed);
    assert_eq!(result.status_of("check (python=3.11)"), JobStatus::Cancelled);
    assert_eq!(result.status_of("check (python=3.12)"), JobStatus::Cancelled);
    assert_eq!(result.template_status("check"), JobStatus::Failed);
    assert_eq!(result.report.status(), RunStatus::Failed);

    let group_cancellations = result
        .events
        .iter()
        .filter(|event| matches!(event, ExecutionEvent::GroupCancelled { .. }))
        .count();
    assert_eq!(group_cancellations, 1);
}

#[tokio::test]
async fn test_fail_fast_cancels_queued_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new().fail("check 3.10");

    let result = run_workflow(
        &workflow(&matrix_workflow(true, Some(1))),
        mock.clone(),
        dir.path(),
    )
    .await;

    assert_eq!(result.status_of("check (python=3.10)"), JobStatus::Failed);
    for name in ["check (python=3.11)", "check (python=3.12)"] {
        assert_eq!(result.status_of(name), JobStatus::Cancelled);
        assert!(result.instance(name).steps.is_empty());
        assert!(mock.calls_for(name).is_empty());
    }
}

#[tokio::test]
async fn test_siblings_independent_without_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new()
        .fail("check 3.10")
        .delay("check 3.1", Duration::from_millis(50), 0);

    let result = run_workflow(&workflow(&matrix_workflow(false, None)), mock, dir.path()).await;

    assert_eq!(result.status_of("check (python=3.10)"), JobStatus::Failed);
    assert_eq!(result.status_of("check (python=3.11)"), JobStatus::Succeeded);
    assert_eq!(result.status_of("check (python=3.12)"), JobStatus::Succeeded);
    assert!(!result
        .events
        .iter()
        .any(|event| matches!(event, ExecutionEvent::GroupCancelled { .. })));
}

#[tokio::test]
async fn test_fail_fast_does_not_cross_templates() {
    let yaml = r#"
name: two-groups
on:
  workflow_dispatch:
jobs:
  unit:
    strategy:
      matrix:
        python: ["3.10", "3.12"]
    steps:
      - run: unit ${{ matrix.python }}
  lint:
    strategy:
      matrix:
        tool: [ruff, mypy]
    steps:
      - run: lint ${{ matrix.tool }}
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new()
        .fail("unit 3.10")
        .delay("lint", Duration::from_millis(100), 0)
        .delay("unit 3.12", Duration::from_secs(5), 0);

    let result = run_workflow(&workflow(yaml), mock, dir.path()).await;

    assert_eq!(result.status_of("unit (python=3.12)"), JobStatus::Cancelled);
    assert_eq!(result.status_of("lint (tool=ruff)"), JobStatus::Succeeded);
    assert_eq!(result.status_of("lint (tool=mypy)"), JobStatus::Succeeded);
}
