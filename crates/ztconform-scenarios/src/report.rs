//! Run results and their markdown rendering.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ztconform_core::{Method, ValidationResult};

use crate::error::StepFailure;

/// Terminal state of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Skipped { reason: String },
    /// One of the group's own steps failed; later siblings did not run.
    Failed { step: String, failure: StepFailure },
    /// Every own step passed but a nested group failed.
    NestedFailed { groups: Vec<String> },
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. } | Outcome::NestedFailed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } | Outcome::NestedFailed { .. } => "failed",
        }
    }
}

/// One issued (or attempted) call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub method: Method,
    /// Rendered path, or the template when rendering never happened
    pub path: String,
    /// `None` when no response was received
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    pub outcome: Outcome,
    pub steps: Vec<StepRecord>,
    pub children: Vec<GroupReport>,
}

impl GroupReport {
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
            steps: Vec::new(),
            children: Vec::new(),
        }
    }

    /// This group and every nested group, depth first.
    pub fn walk(&self) -> Vec<(usize, &GroupReport)> {
        let mut out = Vec::new();
        self.walk_into(0, &mut out);
        out
    }

    fn walk_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a GroupReport)>) {
        out.push((depth, self));
        for child in &self.children {
            child.walk_into(depth + 1, out);
        }
    }
}

/// Counts over every group in a run, nested groups included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub target_version: String,
    pub started_at: String,
    pub groups: Vec<GroupReport>,
}

impl RunReport {
    pub fn new(target_version: impl Into<String>, groups: Vec<GroupReport>) -> Self {
        Self {
            target_version: target_version.into(),
            started_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            groups,
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for group in &self.groups {
            for (_, report) in group.walk() {
                match report.outcome {
                    Outcome::Passed => summary.passed += 1,
                    Outcome::Skipped { .. } => summary.skipped += 1,
                    Outcome::Failed { .. } | Outcome::NestedFailed { .. } => summary.failed += 1,
                }
                summary.steps += report.steps.len();
            }
        }
        summary
    }

    /// True when no top-level group failed.
    pub fn is_success(&self) -> bool {
        !self.groups.iter().any(|g| g.outcome.is_failed())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Render a run as markdown: a summary table, then details for each failure.
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_markdown(report, &mut out);
    out
}

fn write_markdown(report: &RunReport, out: &mut String) -> fmt::Result {
    let summary = report.summary();

    writeln!(out, "# Conformance Report")?;
    writeln!(out)?;
    writeln!(out, "**Target version:** {}", report.target_version)?;
    writeln!(out, "**Started:** {}", report.started_at)?;
    writeln!(
        out,
        "**Result:** {}",
        if report.is_success() { "PASS" } else { "FAIL" }
    )?;
    writeln!(out)?;

    writeln!(out, "## Summary")?;
    writeln!(out)?;
    writeln!(out, "| Outcome | Groups |")?;
    writeln!(out, "|---------|--------|")?;
    writeln!(out, "| Passed  | {} |", summary.passed)?;
    writeln!(out, "| Failed  | {} |", summary.failed)?;
    writeln!(out, "| Skipped | {} |", summary.skipped)?;
    writeln!(out, "| Steps   | {} |", summary.steps)?;
    writeln!(out)?;

    writeln!(out, "## Groups")?;
    writeln!(out)?;
    for group in &report.groups {
        for (depth, g) in group.walk() {
            let indent = "  ".repeat(depth);
            match &g.outcome {
                Outcome::Skipped { reason } => {
                    writeln!(out, "{indent}- **{}**: skipped ({reason})", g.name)?
                }
                outcome => writeln!(out, "{indent}- **{}**: {}", g.name, outcome.label())?,
            }
            for step in &g.steps {
                let status = step
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    out,
                    "{indent}  - `{} {}` {} {}ms{}",
                    step.method,
                    step.path,
                    status,
                    step.elapsed_ms,
                    if step.passed { "" } else { " **failed**" }
                )?;
            }
        }
    }
    writeln!(out)?;

    let failures: Vec<_> = report
        .groups
        .iter()
        .flat_map(|g| g.walk())
        .filter_map(|(_, g)| match &g.outcome {
            Outcome::Failed { step, failure } => Some((g.name.as_str(), step.as_str(), failure)),
            _ => None,
        })
        .collect();
    if failures.is_empty() {
        return Ok(());
    }

    writeln!(out, "## Failures")?;
    for (group, step, failure) in failures {
        writeln!(out)?;
        writeln!(out, "### {group} / {step}")?;
        writeln!(out)?;
        writeln!(out, "{failure}")?;
        match failure {
            StepFailure::Validation {
                schema,
                errors,
                payload,
            } => {
                let result = ValidationResult::Invalid(errors.clone());
                writeln!(out)?;
                writeln!(out, "```text")?;
                write!(out, "{}", result.render(schema, payload.as_ref()))?;
                writeln!(out, "```")?;
            }
            StepFailure::UnexpectedStatus { body: Some(body), .. } => write_payload(out, body)?,
            StepFailure::Expectation {
                actual: Some(actual),
                ..
            } => write_payload(out, actual)?,
            _ => {}
        }
    }
    Ok(())
}

fn write_payload(out: &mut String, value: &Value) -> fmt::Result {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    writeln!(out)?;
    writeln!(out, "```json")?;
    writeln!(out, "{pretty}")?;
    writeln!(out, "```")
}
