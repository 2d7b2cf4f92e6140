//! Core domain models for workflows
//!
//! This module defines the workflow declaration, its typed configuration,
//! and the pure pieces evaluated during a run: triggers, matrix expansion,
//! run conditions, the run context and lifecycle states.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod matrix;
pub mod state;
pub mod trigger;
pub mod workflow;

pub use condition::*;
pub use context::*;
pub use error::ConfigError;
pub use job::*;
pub use matrix::*;
pub use state::*;
pub use trigger::*;
pub use workflow::*;
