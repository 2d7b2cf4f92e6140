//! Trigger evaluation - decides when a workflow run starts
//!
//! Schedules use five-field cron syntax (minute, hour, day of month, month,
//! day of week, with 0 and 7 both meaning Sunday). Ticks are fired at most
//! once: a tick missed between two polls is dropped, never replayed.

use crate::core::{
    context::{EventMetadata, TriggerKind},
    error::ConfigError,
};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed five-field cron schedule
///
/// When both day fields are restricted a tick matches either of them, so the
/// schedule is kept as one `cron` schedule per day field.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let (minute, hour, day_of_month, month) = (fields[0], fields[1], fields[2], fields[3]);
        let day_of_week = translate_day_of_week(fields[4]).map_err(invalid)?;

        let day_fields = if is_unrestricted(day_of_month) || is_unrestricted(fields[4]) {
            let day_of_month = if is_unrestricted(day_of_month) { "*" } else { day_of_month };
            vec![(day_of_month, day_of_week.as_str())]
        } else {
            vec![(day_of_month, "*"), ("*", day_of_week.as_str())]
        };

        let schedules = day_fields
            .into_iter()
            .map(|(day_of_month, day_of_week)| {
                let normalized = format!(
                    "0 {} {} {} {} {}",
                    minute, hour, day_of_month, month, day_of_week
                );
                Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    /// The expression as written in the workflow
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First tick strictly after `after`
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }

    /// Most recent tick in `(after, until]`
    pub fn latest_between(
        &self,
        after: &DateTime<Utc>,
        until: &DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| {
                schedule
                    .after(after)
                    .take_while(|tick| tick <= until)
                    .last()
            })
            .max()
    }
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

/// Expand a POSIX day-of-week field (0 and 7 are Sunday) into day names,
/// which the `cron` crate reads without numbering ambiguity.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if is_unrestricted(field) {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|&step| step > 0)
                    .ok_or_else(|| format!("invalid day-of-week step in '{}'", item))?;
                (range, step)
            }
            None => (item, 1),
        };

        let (first, last) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((first, last)) => (day_number(first)?, day_number(last)?),
            // `n/step` runs from n to the end of the week
            None if step > 1 => (day_number(range)?, 6),
            None => {
                let day = day_number(range)?;
                (day, day)
            }
        };
        if first > last {
            return Err(format!("day-of-week range '{}' runs backwards", range));
        }

        for day in (first..=last).step_by(step) {
            days[day % 7] = true;
        }
    }

    Ok(days
        .iter()
        .zip(DAY_NAMES)
        .filter(|(selected, _)| **selected)
        .map(|(_, name)| name)
        .collect::<Vec<_>>()
        .join(","))
}

/// A day of week as 0-7, from a number or a three-letter name
fn day_number(value: &str) -> Result<usize, String> {
    if let Ok(n) = value.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day of week {} out of range 0-7", n))
        };
    }

    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .ok_or_else(|| format!("unknown day of week '{}'", value))
}

/// A declared trigger
#[derive(Debug, Clone)]
pub enum Trigger {
    Schedule(CronSchedule),
    ManualDispatch,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Schedule(_) => TriggerKind::Schedule,
            Trigger::ManualDispatch => TriggerKind::ManualDispatch,
        }
    }
}

/// A manual request to start a run
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub git_ref: String,
    pub repository: String,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("Workflow '{0}' does not accept manual dispatch")]
    DispatchDisabled(String),
}

/// Decides whether a run starts, for schedules and manual dispatch
#[derive(Debug, Clone)]
pub struct TriggerEvaluator {
    workflow: String,
    triggers: Vec<Trigger>,
    last_checked: DateTime<Utc>,
    git_ref: String,
    repository: String,
}

impl TriggerEvaluator {
    /// Ticks at or before `start` are never fired.
    pub fn new(
        workflow: impl Into<String>,
        triggers: Vec<Trigger>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            triggers,
            last_checked: start,
            git_ref: "refs/heads/main".to_string(),
            repository: String::new(),
        }
    }

    /// Ref and repository recorded on scheduled events
    pub fn with_source(mut self, git_ref: impl Into<String>, repository: impl Into<String>) -> Self {
        self.git_ref = git_ref.into();
        self.repository = repository.into();
        self
    }

    pub fn accepts_dispatch(&self) -> bool {
        self.triggers
            .iter()
            .any(|t| matches!(t, Trigger::ManualDispatch))
    }

    /// Check the schedules at wall-clock time `now`.
    ///
    /// Returns one event for the most recent tick since the previous poll, if
    /// any schedule matched. Older ticks in the same window are dropped.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<EventMetadata> {
        if now <= self.last_checked {
            return None;
        }

        let tick = self
            .triggers
            .iter()
            .filter_map(|trigger| match trigger {
                Trigger::Schedule(schedule) => schedule.latest_between(&self.last_checked, &now),
                Trigger::ManualDispatch => None,
            })
            .max();

        self.last_checked = now;

        let tick = tick?;
        debug!("Schedule tick {} fired for workflow {}", tick, self.workflow);

        Some(EventMetadata {
            kind: TriggerKind::Schedule,
            git_ref: self.git_ref.clone(),
            repository: self.repository.clone(),
            actor: None,
            scheduled_for: Some(tick),
            received_at: now,
        })
    }

    /// Next time any schedule will fire
    pub fn next_tick(&self) -> Option<DateTime<Utc>> {
        self.triggers
            .iter()
            .filter_map(|trigger| match trigger {
                Trigger::Schedule(schedule) => schedule.next_after(&self.last_checked),
                Trigger::ManualDispatch => None,
            })
            .min()
    }

    /// Handle one manual dispatch request. Exactly one event per call.
    pub fn dispatch(&self, request: DispatchRequest) -> Result<EventMetadata, TriggerError> {
        if !self.accepts_dispatch() {
            return Err(TriggerError::DispatchDisabled(self.workflow.clone()));
        }

        Ok(EventMetadata {
            kind: TriggerKind::ManualDispatch,
            git_ref: request.git_ref,
            repository: request.repository,
            actor: request.actor,
            scheduled_for: None,
            received_at: Utc::now(),
        })
    }
}
