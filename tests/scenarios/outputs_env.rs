//! Test: published outputs and the step environment

use crate::helpers::*;
use fallback_ci::core::JobStatus;

#[tokio::test]
async fn test_downstream_gates_on_declared_outputs() {
    let yaml = r#"
name: outputs
on:
  workflow_dispatch:
jobs:
  check:
    outputs:
      result: ${{ job.status }}
      tests: ${{ steps.tests.outcome }}
      suite: selftests
    steps:
      - id: tests
        run: run-tests
  triage:
    needs: check
    if: "always() && needs.check.outputs.tests == 'failure'"
    steps:
      - run: triage
  publish:
    needs: check
    if: "needs.check.outputs.suite == 'selftests'"
    steps:
      - run: publish
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new().fail("run-tests");

    let result = run_workflow(&workflow(yaml), mock.clone(), dir.path()).await;

    let check = result.instance("check");
    assert_eq!(check.outputs.get("result").map(String::as_str), Some("failure"));
    assert_eq!(check.outputs.get("tests").map(String::as_str), Some("failure"));
    assert_eq!(check.outputs.get("suite").map(String::as_str), Some("selftests"));

    assert_eq!(result.status_of("triage"), JobStatus::Succeeded);
    // An explicit condition replaces the implicit success() gate
    assert_eq!(result.status_of("publish"), JobStatus::Succeeded);
    assert!(mock.ran("triage"));
}

#[tokio::test]
async fn test_default_gate_skips_after_upstream_skip() {
    let yaml = r#"
name: chain
on:
  workflow_dispatch:
jobs:
  build:
    steps:
      - run: build
  test:
    needs: build
    steps:
      - run: test
  deploy:
    needs: test
    steps:
      - run: deploy
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new().fail("build");

    let result = run_workflow(&workflow(yaml), mock.clone(), dir.path()).await;

    assert_eq!(result.status_of("build"), JobStatus::Failed);
    assert_skipped(&result, "test");
    assert_skipped(&result, "deploy");
    assert_eq!(mock.calls().len(), 1);
}

#[tokio::test]
async fn test_environment_precedence() {
    let yaml = r#"
name: env
on:
  workflow_dispatch:
env:
  LEVEL: workflow
  SUITE: selftests
jobs:
  check:
    env:
      LEVEL: job
      TARGET: py${{ matrix.python }}
    strategy:
      matrix:
        python: ["3.12"]
    steps:
      - id: plain
        run: plain
      - id: override
        run: override
        env:
          LEVEL: step
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new();

    run_workflow(&workflow(yaml), mock.clone(), dir.path()).await;

    let calls = mock.calls_for("check (python=3.12)");
    let plain = &calls[0].env;
    assert_eq!(plain["LEVEL"], "job");
    assert_eq!(plain["SUITE"], "selftests");
    assert_eq!(plain["TARGET"], "py3.12");
    assert_eq!(plain["MATRIX_PYTHON"], "3.12");
    assert_eq!(plain["CI_EVENT_NAME"], "workflow_dispatch");
    assert_eq!(plain["CI_REF"], "refs/heads/main");
    assert_eq!(plain["CI_ACTOR"], "tester");

    assert_eq!(calls[1].env["LEVEL"], "step");
}
