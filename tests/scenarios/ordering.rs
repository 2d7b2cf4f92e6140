//! Test: matrix expansion order and admission ordering

use crate::helpers::*;
use fallback_ci::core::JobStatus;
use fallback_ci::execution::SchedulingStrategy;
use std::time::Duration;

const PIPELINE: &str = r#"
name: ordering
on:
  workflow_dispatch:
jobs:
  build:
    steps:
      - run: build
  test:
    needs: build
    strategy:
      fail-fast: false
      matrix:
        os: [linux, macos]
        python: ["3.10", "3.11", "3.12"]
    steps:
      - run: test ${{ matrix.os }} ${{ matrix.python }}
  report:
    needs: [build, test]
    if: always()
    steps:
      - run: report
"#;

#[tokio::test]
async fn test_matrix_instances_in_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_workflow(&workflow(PIPELINE), MockExecutor::new(), dir.path()).await;

    let names: Vec<&str> = result
        .report
        .instances_of("test")
        .map(|i| i.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "test (os=linux, python=3.10)",
            "test (os=linux, python=3.11)",
            "test (os=linux, python=3.12)",
            "test (os=macos, python=3.10)",
            "test (os=macos, python=3.11)",
            "test (os=macos, python=3.12)",
        ]
    );
}

#[tokio::test]
async fn test_admission_after_every_prerequisite() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new()
        .delay("test linux 3.11", Duration::from_millis(80), 1)
        .delay("test macos", Duration::from_millis(20), 0);

    let result = run_workflow(&workflow(PIPELINE), mock, dir.path()).await;
    assert_all_terminal(&result);

    let build = result.instance("build");
    let last_test_finish = result
        .report
        .instances_of("test")
        .filter_map(|i| i.finished_seq)
        .max()
        .unwrap();

    for test in result.report.instances_of("test") {
        assert!(test.admitted_seq.unwrap() > build.finished_seq.unwrap());
    }

    let report = result.instance("report");
    assert!(report.admitted_seq.unwrap() > last_test_finish);
    assert_eq!(result.template_status("test"), JobStatus::Failed);
    assert_eq!(result.status_of("report"), JobStatus::Succeeded);
}

#[tokio::test]
async fn test_sequential_strategy_follows_graph_order() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new();

    let result = run_workflow_with(
        &workflow(PIPELINE),
        mock.clone(),
        dir.path(),
        SchedulingStrategy::Sequential,
    )
    .await;

    let order = result.admission_order();
    assert_eq!(order.first().map(String::as_str), Some("build"));
    assert_eq!(order.last().map(String::as_str), Some("report"));

    let calls = mock.calls();
    assert_eq!(calls.len(), 8);
    assert!(calls.windows(2).all(|pair| pair[0].seq < pair[1].seq));
}

#[tokio::test]
async fn test_max_parallel_caps_running_instances() {
    let yaml = r#"
name: capped
on:
  workflow_dispatch:
jobs:
  test:
    strategy:
      max-parallel: 2
      matrix:
        shard: ["1", "2", "3", "4"]
    steps:
      - run: shard ${{ matrix.shard }}
"#;
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new().delay("shard", Duration::from_millis(30), 0);

    let result = run_workflow(&workflow(yaml), mock, dir.path()).await;

    // Shards 3 and 4 are only admitted once a running shard has finished
    let first_finish = result
        .report
        .instances_of("test")
        .filter_map(|i| i.finished_seq)
        .min()
        .unwrap();
    assert!(result.instance("test (shard=3)").admitted_seq.unwrap() > first_finish);
    assert!(result.instance("test (shard=4)").admitted_seq.unwrap() > first_finish);
    assert_eq!(result.template_status("test"), JobStatus::Succeeded);
}
