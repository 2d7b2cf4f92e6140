//! CLI output formatting

use crate::{
    core::{JobStatus, RunStatus, StepStatus},
    execution::{Artifact, ExecutionEvent, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "+ ");

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a job status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        JobStatus::Failed => style("FAILED").red().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} via {} - {} ok, {} failed, {} skipped, {} cancelled - {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.workflow).bold(),
        format_status(summary.status),
        summary.trigger.as_str(),
        style(summary.succeeded).green(),
        style(summary.failed).red(),
        style(summary.skipped).dim(),
        style(summary.cancelled).yellow(),
        style(summary.started_at.to_rfc3339()).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            workflow,
            trigger,
        } => format!(
            "{} Starting workflow {} ({}) via {}",
            ROCKET,
            style(workflow).bold(),
            style(short_id(run_id)).dim(),
            trigger.as_str()
        ),
        ExecutionEvent::JobStarted { instance, .. } => {
            format!("{} {}", SPINNER, style(instance).cyan())
        }
        ExecutionEvent::JobSkipped { instance, reason } => format!(
            "{} {} {}",
            SKIP,
            style(instance).dim(),
            style(format!("({})", reason)).dim()
        ),
        ExecutionEvent::StepStarted { instance, name, .. } => {
            format!("   {} {}", style(instance).dim(), name)
        }
        ExecutionEvent::StepFinished {
            instance,
            step_id,
            status,
            message,
        } => {
            let marker = match status {
                StepStatus::Succeeded => style("ok").green().to_string(),
                StepStatus::Failed => style("failed").red().to_string(),
                StepStatus::Skipped => style("skipped").dim().to_string(),
                StepStatus::Warning => style("warning").yellow().to_string(),
                StepStatus::Cancelled => style("cancelled").yellow().to_string(),
            };
            match message {
                Some(message) => format!(
                    "   {} {} {}: {}",
                    style(instance).dim(),
                    step_id,
                    marker,
                    style(message).dim()
                ),
                None => format!("   {} {} {}", style(instance).dim(), step_id, marker),
            }
        }
        ExecutionEvent::ArtifactCaptured { instance, artifact } => format!(
            "{} {} captured {} ({} files)",
            PACKAGE,
            style(instance).dim(),
            style(&artifact.name).cyan(),
            artifact.file_count
        ),
        ExecutionEvent::JobFinished {
            instance, status, ..
        } => {
            let icon = match status {
                JobStatus::Succeeded => CHECK,
                JobStatus::Failed => CROSS,
                JobStatus::Skipped => SKIP,
                JobStatus::Cancelled => WARN,
            };
            format!("{} {} {}", icon, style(instance).bold(), format_job_status(*status))
        }
        ExecutionEvent::GroupCancelled {
            template,
            failed_instance,
        } => format!(
            "{} {} failed, cancelling the rest of {}",
            WARN,
            style(failed_instance).red(),
            style(template).yellow()
        ),
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Run ({}) {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Per-template results of a finished run
pub fn format_report(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{} {} - {}",
        INFO,
        style(&report.workflow).bold(),
        format_status(report.status())
    )];

    for (template, status) in &report.templates {
        lines.push(format!("  {} {}", style(template).bold(), format_job_status(*status)));
        let instances: Vec<_> = report.instances_of(template).collect();
        if instances.len() > 1 {
            for instance in instances {
                if let Some(status) = instance.status() {
                    lines.push(format!(
                        "    {} {}",
                        style(&instance.name).dim(),
                        format_job_status(status)
                    ));
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (report.state.started_at, report.state.completed_at) {
        if let Ok(duration) = end.signed_duration_since(start).to_std() {
            lines.push(format!("  Duration: {}", style(format_duration(duration)).dim()));
        }
    }

    lines.join("\n")
}

/// One artifact as a listing line
pub fn format_artifact(artifact: &Artifact) -> String {
    format!(
        "{} {} - {} - {} files, {} bytes - expires {}",
        PACKAGE,
        style(&artifact.name).cyan(),
        style(&artifact.instance).bold(),
        artifact.file_count,
        artifact.size_bytes,
        style(artifact.expires_at.format("%Y-%m-%d")).dim()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
