//! Scenario-based tests for fallback-ci

mod artifacts;
mod fail_fast;
mod fallback_workflow;
mod ordering;
mod outputs_env;
mod step_gating;
mod triggers;
