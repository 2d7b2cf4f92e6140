//! Workflow configuration from YAML

use crate::core::{
    condition::Condition,
    error::ConfigError,
    job::{is_upload_artifact, JobTemplate, OutputExpr, StepAction, StepSpec},
    matrix::{MatrixSpec, MatrixValues},
    trigger::{CronSchedule, Trigger},
    workflow::{Workflow, WorkflowSettings},
};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Characters an artifact name may not contain
pub const INVALID_ARTIFACT_NAME_CHARS: [char; 9] = ['\\', '/', '"', ':', '<', '>', '|', '*', '?'];

/// Longest retention an artifact step may declare, in days
pub const MAX_RETENTION_DAYS: u32 = 400;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Triggers that start a run
    #[serde(rename = "on", default)]
    pub triggers: TriggersConfig,

    /// Environment exported to every step
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    #[serde(default)]
    pub settings: SettingsConfig,

    /// Job templates, in declaration order
    #[serde(default)]
    pub jobs: IndexMap<String, JobConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default)]
    pub schedule: Vec<ScheduleConfig>,

    /// Present (with any value, including none) when manual dispatch is allowed
    #[serde(
        default,
        deserialize_with = "key_present",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub workflow_dispatch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(rename = "cancelled-counts-as-failure", default)]
    pub cancelled_counts_as_failure: bool,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Human-readable job name (defaults to the job id)
    #[serde(default)]
    pub name: Option<String>,

    /// Prerequisite jobs, a single id or a list
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,

    /// Run condition
    #[serde(rename = "if", default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Declared outputs
    #[serde(default)]
    pub outputs: IndexMap<String, String>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(rename = "fail-fast", default = "default_fail_fast")]
    pub fail_fast: bool,

    #[serde(rename = "max-parallel", default)]
    pub max_parallel: Option<usize>,

    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
}

fn default_fail_fast() -> bool {
    true
}

/// Matrix configuration: named axes plus `include` / `exclude`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    #[serde(default)]
    pub include: Vec<IndexMap<String, Value>>,

    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,

    /// Every other key is an axis
    #[serde(flatten)]
    pub axes: IndexMap<String, Value>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "if", default)]
    pub condition: Option<String>,

    /// Inline shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Named external action
    #[serde(default)]
    pub uses: Option<String>,

    /// Options for `uses`
    #[serde(default)]
    pub with: IndexMap<String, Value>,

    #[serde(default)]
    pub env: IndexMap<String, Value>,

    #[serde(rename = "timeout-minutes", default)]
    pub timeout_minutes: Option<u64>,
}

fn key_present<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    serde::de::IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(one)) => vec![one],
        Some(OneOrMany::Many(many)) => many,
        None => Vec::new(),
    })
}

/// Render a YAML scalar the way it would appear in an environment variable
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn scalar_map(
    map: &IndexMap<String, Value>,
    location: &str,
) -> std::result::Result<BTreeMap<String, String>, ConfigError> {
    map.iter()
        .map(|(key, value)| {
            scalar_to_string(value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| ConfigError::InvalidValue {
                    location: location.to_string(),
                    key: key.clone(),
                    reason: "expected a scalar".to_string(),
                })
        })
        .collect()
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.to_workflow().map(|_| ())
    }

    /// Convert config to a validated Workflow domain model
    pub fn to_workflow(&self) -> std::result::Result<Workflow, ConfigError> {
        if self.jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }

        let triggers = self.build_triggers()?;

        // Check that all needs reference existing jobs
        for (id, job) in &self.jobs {
            for need in &job.needs {
                if !self.jobs.contains_key(need) {
                    return Err(ConfigError::UnknownNeed {
                        job: id.clone(),
                        need: need.clone(),
                    });
                }
            }
        }

        self.check_cycles()?;

        let jobs = self
            .jobs
            .iter()
            .map(|(id, job)| job.to_template(id))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Workflow::new(
            self.name.clone(),
            triggers,
            scalar_map(&self.env, "workflow env")?,
            WorkflowSettings {
                cancelled_counts_as_failure: self.settings.cancelled_counts_as_failure,
            },
            jobs,
        ))
    }

    fn build_triggers(&self) -> std::result::Result<Vec<Trigger>, ConfigError> {
        let mut triggers = self
            .triggers
            .schedule
            .iter()
            .map(|s| CronSchedule::parse(&s.cron).map(Trigger::Schedule))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if self.triggers.workflow_dispatch {
            triggers.push(Trigger::ManualDispatch);
        }

        if triggers.is_empty() {
            return Err(ConfigError::NoTriggers);
        }

        Ok(triggers)
    }

    /// Check for cycles in the job dependency graph
    fn check_cycles(&self) -> std::result::Result<(), ConfigError> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for id in self.jobs.keys() {
            if !visited.contains(id) {
                self.dfs_check(id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> std::result::Result<(), ConfigError> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some(job) = self.jobs.get(job_id) {
            for need in &job.needs {
                if recursion_stack.contains(need) {
                    return Err(ConfigError::Cycle(need.clone()));
                }
                if !visited.contains(need) {
                    self.dfs_check(need, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }
}

impl JobConfig {
    fn to_template(&self, id: &str) -> std::result::Result<JobTemplate, ConfigError> {
        let location = format!("job '{}'", id);

        let condition = self
            .condition
            .as_deref()
            .map(|expr| parse_condition(expr, &location, &self.needs))
            .transpose()?;

        let matrix = match &self.strategy {
            Some(strategy) => strategy.to_matrix(id)?,
            None => None,
        };

        let steps = self.build_steps(id)?;

        let step_ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut outputs = IndexMap::new();
        for (key, raw) in &self.outputs {
            let expr = OutputExpr::parse(raw);
            if let OutputExpr::StepOutcome(step) = &expr {
                if !step_ids.contains(step.as_str()) {
                    return Err(ConfigError::UnknownOutputStep {
                        job: id.to_string(),
                        output: key.clone(),
                        step: step.clone(),
                    });
                }
            }
            outputs.insert(key.clone(), expr);
        }

        Ok(JobTemplate {
            id: id.to_string(),
            name: self.name.clone().unwrap_or_else(|| id.to_string()),
            matrix,
            needs: self.needs.clone(),
            condition,
            steps,
            outputs,
            env: scalar_map(&self.env, &location)?,
        })
    }

    fn build_steps(&self, job_id: &str) -> std::result::Result<Vec<StepSpec>, ConfigError> {
        let mut seen_ids = HashSet::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            let id = step.id.clone().unwrap_or_else(|| format!("step-{}", number));
            if !seen_ids.insert(id.clone()) {
                return Err(ConfigError::DuplicateStepId {
                    job: job_id.to_string(),
                    step: id,
                });
            }

            let location = format!("step '{}' of job '{}'", id, job_id);

            let action = match (&step.run, &step.uses) {
                (Some(command), None) => StepAction::Run(command.clone()),
                (None, Some(action)) => StepAction::Uses {
                    action: action.clone(),
                    with: scalar_map(&step.with, &location)?.into_iter().collect(),
                },
                _ => {
                    return Err(ConfigError::InvalidStepAction {
                        job: job_id.to_string(),
                        index: number,
                    })
                }
            };

            if let StepAction::Uses { action, with } = &action {
                if is_upload_artifact(action) {
                    validate_artifact_options(job_id, with)?;
                }
            }

            let condition = match &step.condition {
                Some(expr) => parse_condition(expr, &location, &self.needs)?,
                None => Condition::Success,
            };

            let name = step.name.clone().unwrap_or_else(|| match &action {
                StepAction::Run(command) => command.lines().next().unwrap_or_default().to_string(),
                StepAction::Uses { action, .. } => action.clone(),
            });

            steps.push(StepSpec {
                id,
                name,
                condition,
                action,
                env: scalar_map(&step.env, &location)?,
                timeout: step.timeout_minutes.map(|m| Duration::from_secs(m * 60)),
            });
        }

        Ok(steps)
    }
}

fn parse_condition(
    expression: &str,
    location: &str,
    needs: &[String],
) -> std::result::Result<Condition, ConfigError> {
    let condition = Condition::parse(expression)
        .map_err(|e| ConfigError::malformed(location, expression, e.reason))?;

    if let Some(job) = condition
        .referenced_jobs()
        .into_iter()
        .find(|job| !needs.iter().any(|need| need.as_str() == *job))
    {
        return Err(ConfigError::UnreachableReference {
            location: location.to_string(),
            job: job.to_string(),
        });
    }

    Ok(condition)
}

/// Check the options of an artifact capture step
pub fn validate_artifact_options(
    job_id: &str,
    with: &IndexMap<String, String>,
) -> std::result::Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidArtifactStep {
        job: job_id.to_string(),
        reason,
    };

    let name = with.get("name").map(String::as_str).unwrap_or_default();
    if name.trim().is_empty() {
        return Err(invalid("missing 'name'".to_string()));
    }
    if let Some(c) = name.chars().find(|c| INVALID_ARTIFACT_NAME_CHARS.contains(c)) {
        return Err(invalid(format!("name '{}' contains invalid character '{}'", name, c)));
    }

    if with.get("path").map_or(true, |p| p.trim().is_empty()) {
        return Err(invalid("missing 'path'".to_string()));
    }

    if let Some(days) = with.get("retention-days") {
        match days.trim().parse::<u32>() {
            Ok(n) if (1..=MAX_RETENTION_DAYS).contains(&n) => {}
            Ok(n) => {
                return Err(invalid(format!(
                    "retention-days {} is outside 1-{}",
                    n, MAX_RETENTION_DAYS
                )))
            }
            Err(_) => return Err(invalid(format!("retention-days '{}' is not a number", days))),
        }
    }

    Ok(())
}

impl StrategyConfig {
    fn to_matrix(&self, job_id: &str) -> std::result::Result<Option<MatrixSpec>, ConfigError> {
        let Some(matrix) = &self.matrix else {
            return Ok(None);
        };

        let invalid = |reason: String| ConfigError::InvalidMatrix {
            job: job_id.to_string(),
            reason,
        };

        if matrix.axes.is_empty() && matrix.include.is_empty() {
            return Err(invalid("matrix declares no axes".to_string()));
        }

        let mut axes = IndexMap::new();
        for (axis, value) in &matrix.axes {
            let Value::Sequence(items) = value else {
                return Err(invalid(format!("axis '{}' must be a list", axis)));
            };
            let values = items
                .iter()
                .map(|item| {
                    scalar_to_string(item)
                        .ok_or_else(|| invalid(format!("axis '{}' has a non-scalar value", axis)))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            axes.insert(axis.clone(), values);
        }

        let combination = |entry: &IndexMap<String, Value>| -> std::result::Result<MatrixValues, ConfigError> {
            entry
                .iter()
                .map(|(key, value)| {
                    scalar_to_string(value)
                        .map(|v| (key.clone(), v))
                        .ok_or_else(|| invalid(format!("'{}' has a non-scalar value", key)))
                })
                .collect()
        };

        let mut exclude = Vec::with_capacity(matrix.exclude.len());
        for entry in &matrix.exclude {
            if let Some(key) = entry.keys().find(|key| !axes.contains_key(*key)) {
                return Err(invalid(format!("exclude references unknown axis '{}'", key)));
            }
            exclude.push(combination(entry)?);
        }

        let include = matrix
            .include
            .iter()
            .map(combination)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if self.max_parallel == Some(0) {
            return Err(invalid("max-parallel must be at least 1".to_string()));
        }

        Ok(Some(MatrixSpec {
            axes,
            include,
            exclude,
            fail_fast: self.fail_fast,
            max_parallel: self.max_parallel,
        }))
    }
}
