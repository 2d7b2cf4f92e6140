//! Scenario-based tests for fallback-ci

mod helpers;
mod scenarios;
