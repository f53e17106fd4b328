//! Result model shared by every validator.
//!
//! A [`CheckResult`] is produced once and never edited in place; timing and
//! captured output are attached through consuming builders.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pass => write!(f, "pass"),
            Status::Fail => write!(f, "fail"),
        }
    }
}

/// Advisory weight of a check. Never affects pass/fail aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One verdict with its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Dotted identifier, e.g. `make.targets`
    pub check_id: String,

    pub status: Status,

    pub severity: Severity,

    /// Human-readable summary
    pub message: String,

    /// Literal evidence strings, in the order they were found
    #[serde(default)]
    pub evidence: Vec<String>,

    /// Wall time spent producing this result
    #[serde(default)]
    pub duration_ms: Option<f64>,

    /// Trimmed stdout of an external step
    #[serde(default)]
    pub stdout_summary: Option<String>,

    /// Trimmed stderr of an external step
    #[serde(default)]
    pub stderr_summary: Option<String>,
}

impl CheckResult {
    pub fn new(
        check_id: impl Into<String>,
        status: Status,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            status,
            severity,
            message: message.into(),
            evidence: Vec::new(),
            duration_ms: None,
            stdout_summary: None,
            stderr_summary: None,
        }
    }

    pub fn pass(check_id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(check_id, Status::Pass, severity, message)
    }

    pub fn fail(check_id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(check_id, Status::Fail, severity, message)
    }

    /// Replace the evidence list.
    pub fn with_evidence<I, S>(mut self, evidence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evidence = evidence.into_iter().map(Into::into).collect();
        self
    }

    /// Attach timing unless an inner step already recorded its own.
    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        if self.duration_ms.is_none() {
            self.duration_ms = Some((duration_ms * 100.0).round() / 100.0);
        }
        self
    }

    /// Attach captured process output; empty summaries are dropped.
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let (stdout, stderr) = (stdout.into(), stderr.into());
        self.stdout_summary = (!stdout.is_empty()).then_some(stdout);
        self.stderr_summary = (!stderr.is_empty()).then_some(stderr);
        self
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }

    pub fn failed(&self) -> bool {
        self.status == Status::Fail
    }
}

/// All checks run against one tool package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub status: Status,
    pub checks: Vec<CheckResult>,
}

impl ToolResult {
    /// Status is `fail` iff any check failed, regardless of severity.
    pub fn new(name: impl Into<String>, checks: Vec<CheckResult>) -> Self {
        let status = if checks.iter().any(CheckResult::failed) {
            Status::Fail
        } else {
            Status::Pass
        };
        Self {
            name: name.into(),
            status,
            checks,
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.failed())
    }

    pub fn check(&self, check_id: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check_id == check_id)
    }
}
