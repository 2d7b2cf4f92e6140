//! Test: failure-gated artifact capture

use crate::helpers::*;
use fallback_ci::core::{JobStatus, StepStatus};
use fallback_ci::execution::{ArtifactArchiver, ExecutionEvent};
use std::fs;
use std::path::Path;

fn capture_workflow(logs: &Path) -> String {
    format!(
        r#"
name: artifacts
on:
  workflow_dispatch:
jobs:
  check:
    strategy:
      fail-fast: false
      matrix:
        python: ["3.10", "3.12"]
    steps:
      - id: tests
        run: check ${{{{ matrix.python }}}}
      - name: Archive logs
        if: failure()
        uses: actions/upload-artifact@v4
        with:
          name: logs-${{{{ matrix.python }}}}
          path: {}
          retention-days: 7
"#,
        logs.display()
    )
}

fn write_logs(dir: &Path) {
    fs::create_dir_all(dir.join("job-1")).unwrap();
    fs::write(dir.join("job-1").join("debug.log"), "traceback").unwrap();
    fs::write(dir.join("summary.txt"), "1 failed").unwrap();
}

#[tokio::test]
async fn test_failed_instance_artifact_is_retrievable() {
    let work = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let logs = work.path().join("logs");
    write_logs(&logs);

    let mock = MockExecutor::new().fail("check 3.12");
    let result = run_workflow(&workflow(&capture_workflow(&logs)), mock, store.path()).await;

    assert_eq!(result.status_of("check (python=3.12)"), JobStatus::Failed);
    assert_eq!(
        result.step_status("check (python=3.12)", "step-2"),
        StepStatus::Succeeded
    );
    assert_eq!(
        result.step_status("check (python=3.10)", "step-2"),
        StepStatus::Skipped
    );

    let archiver = ArtifactArchiver::new(store.path());
    let artifact = archiver
        .get(result.report.run_id, "check (python=3.12)", "logs-3.12")
        .unwrap()
        .expect("artifact should be stored");

    assert_eq!(artifact.file_count, 2);
    assert_eq!(
        fs::read_to_string(artifact.stored_at.join("job-1").join("debug.log")).unwrap(),
        "traceback"
    );
    assert_eq!((artifact.expires_at - artifact.created_at).num_days(), 7);

    let listed = archiver.list(result.report.run_id).unwrap();
    assert_eq!(listed, vec![artifact.clone()]);
    assert_eq!(result.report.artifacts().count(), 1);
    assert!(result
        .events
        .iter()
        .any(|event| matches!(event, ExecutionEvent::ArtifactCaptured { .. })));
}

#[tokio::test]
async fn test_succeeding_run_stores_no_artifacts() {
    let work = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let logs = work.path().join("logs");
    write_logs(&logs);

    let result = run_workflow(
        &workflow(&capture_workflow(&logs)),
        MockExecutor::new(),
        store.path(),
    )
    .await;

    assert_eq!(result.template_status("check"), JobStatus::Succeeded);
    assert!(ArtifactArchiver::new(store.path())
        .list(result.report.run_id)
        .unwrap()
        .is_empty());
    assert_eq!(result.report.artifacts().count(), 0);
}

#[tokio::test]
async fn test_missing_capture_path_is_a_warning() {
    let work = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let missing = work.path().join("never-written");

    let mock = MockExecutor::new().fail("check");
    let result = run_workflow(&workflow(&capture_workflow(&missing)), mock, store.path()).await;

    for name in ["check (python=3.10)", "check (python=3.12)"] {
        assert_eq!(result.step_status(name, "step-2"), StepStatus::Warning);
        // The instance fails because of the tests step only
        assert_eq!(result.instance(name).state.status(), Some(JobStatus::Failed));
        assert!(result.instance(name).artifacts.is_empty());
    }
}
