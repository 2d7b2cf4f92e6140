//! Job template and step domain model

use crate::core::{
    condition::Condition,
    matrix::{MatrixSpec, MatrixValues},
    state::{JobStatus, StepRecord},
};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::time::Duration;

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Inline shell command
    Run(String),
    /// Named external action with its recognized options
    Uses {
        action: String,
        with: IndexMap<String, String>,
    },
}

/// A single step of a job template
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Explicit `id:` or `step-<n>` (1-based)
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// Run condition, `success()` unless declared
    pub condition: Condition,

    pub action: StepAction,

    /// Step-level environment, highest precedence
    pub env: BTreeMap<String, String>,

    /// Limit handed to the executor
    pub timeout: Option<Duration>,
}

impl StepSpec {
    /// Whether this step is an artifact capture (`uses: .../upload-artifact@...`)
    pub fn is_artifact_capture(&self) -> bool {
        match &self.action {
            StepAction::Uses { action, .. } => is_upload_artifact(action),
            StepAction::Run(_) => false,
        }
    }

    /// Failures of `always()` steps do not fail the instance
    pub fn counts_toward_status(&self) -> bool {
        !self.condition.is_always()
    }
}

/// Recognize `upload-artifact`, `actions/upload-artifact@v4` and similar
pub fn is_upload_artifact(action: &str) -> bool {
    let without_ref = action.split('@').next().unwrap_or(action);
    let name = without_ref.rsplit('/').next().unwrap_or(without_ref);
    name == "upload-artifact"
}

/// Value of a declared job output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputExpr {
    /// `${{ job.status }}`
    JobStatus,
    /// `${{ steps.<id>.outcome }}`
    StepOutcome(String),
    /// Anything else, published verbatim
    Literal(String),
}

impl OutputExpr {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|rest| rest.strip_suffix("}}"))
            .map(str::trim);

        match inner {
            Some("job.status") => OutputExpr::JobStatus,
            Some(expr) => {
                let parts: Vec<&str> = expr.split('.').collect();
                match parts.as_slice() {
                    ["steps", id, "outcome"] | ["steps", id, "conclusion"] => {
                        OutputExpr::StepOutcome(id.to_string())
                    }
                    _ => OutputExpr::Literal(raw.to_string()),
                }
            }
            None => OutputExpr::Literal(raw.to_string()),
        }
    }

    /// Evaluate once the instance is terminal
    pub fn evaluate(&self, status: JobStatus, steps: &[StepRecord]) -> String {
        match self {
            OutputExpr::JobStatus => status.as_str().to_string(),
            OutputExpr::StepOutcome(id) => steps
                .iter()
                .find(|s| &s.id == id)
                .map(|s| s.status.as_str().to_string())
                .unwrap_or_else(|| "skipped".to_string()),
            OutputExpr::Literal(value) => value.clone(),
        }
    }
}

/// Declarative definition of one unit of work, possibly matrixed
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// Key under `jobs:`; what `needs` and conditions refer to
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub matrix: Option<MatrixSpec>,

    /// Templates that must be terminal first
    pub needs: Vec<String>,

    /// Explicit run condition; `None` means the implicit `success()` gate
    pub condition: Option<Condition>,

    pub steps: Vec<StepSpec>,

    /// Declared outputs, in declaration order
    pub outputs: IndexMap<String, OutputExpr>,

    /// Job-level environment
    pub env: BTreeMap<String, String>,
}

impl JobTemplate {
    /// The condition actually evaluated at admission
    pub fn gate(&self) -> Condition {
        self.condition.clone().unwrap_or(Condition::Success)
    }

    pub fn fail_fast(&self) -> bool {
        self.matrix.as_ref().is_some_and(|m| m.fail_fast)
    }

    pub fn max_parallel(&self) -> Option<usize> {
        self.matrix.as_ref().and_then(|m| m.max_parallel)
    }

    /// Evaluate declared outputs for a terminal instance
    pub fn evaluate_outputs(&self, status: JobStatus, steps: &[StepRecord]) -> BTreeMap<String, String> {
        self.outputs
            .iter()
            .map(|(key, expr)| (key.clone(), expr.evaluate(status, steps)))
            .collect()
    }
}

/// Replace `${{ matrix.<axis> }}` placeholders
pub fn render_matrix(template: &str, values: &MatrixValues) -> String {
    let mut rendered = template.to_string();

    for (key, value) in values {
        for placeholder in [
            format!("${{{{ matrix.{} }}}}", key),
            format!("${{{{matrix.{}}}}}", key),
        ] {
            rendered = rendered.replace(&placeholder, value);
        }
    }

    rendered
}
