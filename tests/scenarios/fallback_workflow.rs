//! Test: a reduced suite that only runs when the full suite fails

use crate::helpers::*;
use fallback_ci::core::{JobStatus, RunStatus};

const FALLBACK: &str = r#"
name: weekly-check
on:
  schedule:
    - cron: "0 5 * * 1"
  workflow_dispatch:
jobs:
  full-check:
    name: Full check
    strategy:
      fail-fast: false
      matrix:
        python: ["3.10", "3.12"]
    outputs:
      result: ${{ job.status }}
    steps:
      - run: python${{ matrix.python }} selftests/check.py
  reduced-check:
    name: Reduced check
    needs: full-check
    if: "needs.full-check.result == 'failure'"
    strategy:
      fail-fast: false
      matrix:
        python: ["3.10", "3.12"]
    steps:
      - run: python${{ matrix.python }} selftests/check.py --disable-optional
"#;

#[tokio::test]
async fn test_fallback_skipped_when_full_suite_passes() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new();

    let result = run_workflow(&workflow(FALLBACK), mock.clone(), dir.path()).await;

    assert_all_terminal(&result);
    assert_eq!(result.template_status("full-check"), JobStatus::Succeeded);
    assert_eq!(result.template_status("reduced-check"), JobStatus::Skipped);
    assert_skipped(&result, "reduced-check (python=3.10)");
    assert_skipped(&result, "reduced-check (python=3.12)");
    assert!(!mock.ran("--disable-optional"));
    assert_eq!(result.report.status(), RunStatus::Succeeded);
}

#[tokio::test]
async fn test_fallback_runs_when_full_suite_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new()
        .exit("--disable-optional", 0)
        .fail("python3.12 selftests/check.py");

    let result = run_workflow(&workflow(FALLBACK), mock.clone(), dir.path()).await;

    assert_all_terminal(&result);
    assert_eq!(result.status_of("full-check (python=3.10)"), JobStatus::Succeeded);
    assert_eq!(result.status_of("full-check (python=3.12)"), JobStatus::Failed);
    assert_eq!(result.template_status("full-check"), JobStatus::Failed);

    assert_eq!(result.status_of("reduced-check (python=3.10)"), JobStatus::Succeeded);
    assert_eq!(result.status_of("reduced-check (python=3.12)"), JobStatus::Succeeded);
    assert_eq!(mock.calls_for("reduced-check (python=3.12)").len(), 1);

    // The primary failure still fails the run
    assert_eq!(result.report.status(), RunStatus::Failed);
}

#[tokio::test]
async fn test_fail_fast_primary_still_triggers_fallback() {
    let yaml = r#"
name: fail-fast-primary
on:
  workflow_dispatch:
jobs:
  full:
    strategy:
      matrix:
        python: ["3.10", "3.12"]
    steps:
      - run: full ${{ matrix.python }}
  reduced:
    needs: full
    if: failure()
    steps:
      - run: reduced
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new()
        .fail("full 3.10")
        .delay("full 3.12", std::time::Duration::from_secs(5), 0);

    let result = run_workflow(&workflow(yaml), mock.clone(), dir.path()).await;

    assert_eq!(result.status_of("full (python=3.10)"), JobStatus::Failed);
    assert_eq!(result.status_of("full (python=3.12)"), JobStatus::Cancelled);
    assert_eq!(result.template_status("full"), JobStatus::Failed);
    assert_eq!(result.status_of("reduced"), JobStatus::Succeeded);
    assert!(mock.ran("reduced"));
}

#[test]
fn test_bundled_workflow_needs_no_extra_actions() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("workflows/weekly-check.yml");
    let workflow = fallback_ci::core::config::WorkflowConfig::from_file(&path)
        .unwrap()
        .to_workflow()
        .unwrap();

    // Only artifact captures may use named actions; anything else would need
    // --action or --ignore-unknown-actions under the shell executor
    for job in &workflow.jobs {
        for step in &job.steps {
            if let fallback_ci::core::job::StepAction::Uses { action, .. } = &step.action {
                assert!(
                    step.is_artifact_capture(),
                    "{} step '{}' uses unhandled action {}",
                    job.id,
                    step.id,
                    action
                );
            }
        }
    }
}
