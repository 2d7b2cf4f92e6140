//! Test: run creation from triggers

use crate::helpers::*;
use chrono::{TimeZone, Utc};
use fallback_ci::core::{DispatchRequest, TriggerError, TriggerKind};
use fallback_ci::execution::{EngineConfig, ExecutionEngine, ExecutionEvent};
use std::sync::{Arc, Mutex};

const SCHEDULED: &str = r#"
name: weekly-check
on:
  schedule:
    - cron: "0 5 * * 1"
  workflow_dispatch:
jobs:
  check:
    steps:
      - run: check
"#;

fn request() -> DispatchRequest {
    DispatchRequest {
        git_ref: "refs/heads/main".to_string(),
        repository: "acme/suite".to_string(),
        actor: Some("tester".to_string()),
    }
}

#[tokio::test]
async fn test_one_dispatch_starts_exactly_one_run() {
    let wf = workflow(SCHEDULED);
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new();

    let event = wf
        .trigger_evaluator(Utc::now())
        .dispatch(request())
        .unwrap();
    assert_eq!(event.kind, TriggerKind::ManualDispatch);

    let started = Arc::new(Mutex::new(Vec::new()));
    let sink = started.clone();
    let engine = ExecutionEngine::new(mock.clone(), EngineConfig::new(dir.path()))
        .with_event_handler(move |event| {
            if let ExecutionEvent::RunStarted { run_id, .. } = event {
                sink.lock().unwrap().push(run_id);
            }
        });

    let report = engine.execute(&wf, event).await.unwrap();

    assert_eq!(*started.lock().unwrap(), vec![report.run_id]);
    assert_eq!(mock.calls().len(), 1);
    assert_eq!(report.event.actor.as_deref(), Some("tester"));
}

#[test]
fn test_dispatch_rejected_without_dispatch_trigger() {
    let wf = workflow(
        r#"
name: nightly
on:
  schedule:
    - cron: "0 3 * * *"
jobs:
  check:
    steps:
      - run: check
"#,
    );

    let result = wf.trigger_evaluator(Utc::now()).dispatch(request());
    assert_eq!(
        result.unwrap_err(),
        TriggerError::DispatchDisabled("nightly".to_string())
    );
}

#[test]
fn test_schedule_fires_once_per_tick() {
    let wf = workflow(SCHEDULED);
    // Sunday 2024-06-02 12:00 UTC; next tick is Monday 05:00
    let start = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();
    let mut evaluator = wf.trigger_evaluator(start).with_source("refs/heads/main", "acme/suite");

    assert_eq!(
        evaluator.next_tick(),
        Some(Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap())
    );
    assert!(evaluator
        .poll(Utc.with_ymd_and_hms(2024, 6, 3, 4, 59, 0).unwrap())
        .is_none());

    let event = evaluator
        .poll(Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 30).unwrap())
        .expect("tick should fire");
    assert_eq!(event.kind, TriggerKind::Schedule);
    assert_eq!(
        event.scheduled_for,
        Some(Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap())
    );

    // Same tick is never fired twice
    assert!(evaluator
        .poll(Utc.with_ymd_and_hms(2024, 6, 3, 5, 1, 0).unwrap())
        .is_none());
}

#[test]
fn test_schedule_with_both_day_fields_fires_on_either() {
    let wf = workflow(
        r#"
name: maintenance
on:
  schedule:
    - cron: "0 6 1 * 1-5/2"
jobs:
  check:
    steps:
      - run: check
"#,
    );
    let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap();

    // Friday 2024-05-31 noon; Saturday the 1st matches by day of month
    let start = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();
    let mut evaluator = wf.trigger_evaluator(start);
    assert_eq!(evaluator.next_tick(), Some(at(1, 6)));

    let event = evaluator.poll(at(1, 7)).expect("day-of-month tick should fire");
    assert_eq!(event.scheduled_for, Some(at(1, 6)));

    // Monday matches by day of week; Tuesday is not in 1-5/2
    assert_eq!(evaluator.next_tick(), Some(at(3, 6)));
    let event = evaluator.poll(at(4, 12)).expect("day-of-week tick should fire");
    assert_eq!(event.scheduled_for, Some(at(3, 6)));
    assert_eq!(evaluator.next_tick(), Some(at(5, 6)));
}
