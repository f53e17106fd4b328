//! Build-target invocation.
//!
//! Every phase that re-runs a tool shells out to `make <target>` in the
//! tool root. The child inherits the process environment plus the
//! overrides collected in a [`MakeEnv`]; nothing is retried and no timeout
//! is imposed.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Instant;
use thiserror::Error;

use toolcheck_core::{CheckResult, Severity};

/// Captured output is cut to this many characters in reports.
pub const SUMMARY_LIMIT: usize = 800;

/// Errors raised while preparing or launching a build target.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("Failed to run make {target}: {source}")]
    Spawn {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Trim process output for display: whitespace is stripped and anything
/// past [`SUMMARY_LIMIT`] characters is replaced by `…`.
pub fn summarize_output(output: &str) -> String {
    let cleaned = output.trim();
    if cleaned.chars().count() <= SUMMARY_LIMIT {
        return cleaned.to_string();
    }
    let head: String = cleaned.chars().take(SUMMARY_LIMIT).collect();
    format!("{}…", head.trim_end())
}

/// Environment overrides layered on top of the inherited environment.
///
/// Overrides accumulate across phases: the evaluate phase still sees the
/// `OUTPUT_DIR` set by a preceding analyze phase.
#[derive(Debug, Clone, Default)]
pub struct MakeEnv {
    vars: BTreeMap<String, String>,
}

impl MakeEnv {
    /// Base overrides; a configured venv exports `VENV` and `PYTHON`.
    pub fn new(venv: Option<&Path>) -> Self {
        let mut env = Self::default();
        if let Some(venv) = venv {
            env.set("VENV", venv.display().to_string());
            env.set("PYTHON", venv.join("bin").join("python").display().to_string());
        }
        env
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Exit status and captured streams of one `make` run.
#[derive(Debug, Clone)]
pub struct MakeOutcome {
    pub target: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: f64,
}

impl MakeOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The check a phase reports for this run.
    ///
    /// A failure's evidence is the stdout summary, or the stderr summary
    /// when stdout was empty.
    pub fn to_check(&self, check_id: &str, severity: Severity) -> CheckResult {
        let stdout = summarize_output(&self.stdout);
        let stderr = summarize_output(&self.stderr);
        let check = if self.success() {
            CheckResult::pass(check_id, severity, format!("make {} succeeded", self.target))
        } else {
            let primary = if self.stdout.trim().is_empty() { &stderr } else { &stdout };
            CheckResult::fail(check_id, severity, format!("make {} failed", self.target))
                .with_evidence([primary.clone()])
        };
        check.with_duration(self.duration_ms).with_output(stdout, stderr)
    }
}

/// Run `make <target>` in `tool_root` and wait for it.
pub fn run_make(tool_root: &Path, target: &str, env: &MakeEnv) -> Result<MakeOutcome, ExecutionError> {
    tracing::info!(tool_root = %tool_root.display(), target, "Running make");
    let start = Instant::now();
    let output = Command::new("make")
        .arg(target)
        .current_dir(tool_root)
        .envs(env.iter())
        .output()
        .map_err(|source| ExecutionError::Spawn {
            target: target.to_string(),
            source,
        })?;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let outcome = MakeOutcome {
        target: target.to_string(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        duration_ms,
    };
    if !outcome.success() {
        tracing::warn!(
            tool_root = %tool_root.display(),
            target,
            exit_code = ?outcome.exit_code,
            "make target failed"
        );
    }
    Ok(outcome)
}

/// Run a target and fold launch errors into a failed check.
pub fn make_check(
    tool_root: &Path,
    target: &str,
    env: &MakeEnv,
    check_id: &str,
    severity: Severity,
) -> (CheckResult, bool) {
    match run_make(tool_root, target, env) {
        Ok(outcome) => (outcome.to_check(check_id, severity), outcome.success()),
        Err(e) => {
            tracing::warn!(tool_root = %tool_root.display(), error = %e, "Unable to launch make");
            let check = CheckResult::fail(check_id, severity, format!("make {} failed", target))
                .with_evidence([e.to_string()])
                .with_duration(0.0);
            (check, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use toolcheck_core::Status;

    fn outcome(exit_code: i32, stdout: &str, stderr: &str) -> MakeOutcome {
        MakeOutcome {
            target: "analyze".to_string(),
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 12.3456,
        }
    }

    #[test]
    fn test_summarize_short_output() {
        assert_eq!(summarize_output("  done\n"), "done");
        assert_eq!(summarize_output("   "), "");
    }

    #[test]
    fn test_summarize_truncates_long_output() {
        let long = format!("{} tail", "x".repeat(900));
        let summary = summarize_output(&long);
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().count(), SUMMARY_LIMIT + 1);
    }

    #[test]
    fn test_summarize_strips_before_ellipsis() {
        let text = format!("{}{}{}", "a".repeat(795), " ".repeat(10), "b".repeat(10));
        assert_eq!(summarize_output(&text), format!("{}…", "a".repeat(795)));
    }

    #[test]
    fn test_env_exports_venv() {
        let env = MakeEnv::new(Some(Path::new("/opt/venv")));
        assert_eq!(env.get("VENV"), Some("/opt/venv"));
        assert_eq!(env.get("PYTHON"), Some("/opt/venv/bin/python"));
        assert!(MakeEnv::new(None).get("VENV").is_none());
    }

    #[test]
    fn test_failed_outcome_prefers_stdout() {
        let check = outcome(2, "boom", "warning").to_check("run.analyze", Severity::Critical);
        assert_eq!(check.status, Status::Fail);
        assert_eq!(check.message, "make analyze failed");
        assert_eq!(check.evidence, vec!["boom"]);
        assert_eq!(check.duration_ms, Some(12.35));
        assert_eq!(check.stderr_summary.as_deref(), Some("warning"));

        let check = outcome(2, "", "missing rule").to_check("run.analyze", Severity::Critical);
        assert_eq!(check.evidence, vec!["missing rule"]);
        assert!(check.stdout_summary.is_none());
    }

    #[test]
    fn test_successful_outcome() {
        let check = outcome(0, "ok", "").to_check("run.analyze", Severity::Critical);
        assert!(check.passed());
        assert_eq!(check.message, "make analyze succeeded");
        assert!(check.evidence.is_empty());
    }

    proptest! {
        #[test]
        fn test_summary_never_exceeds_limit(text in ".{0,1200}") {
            prop_assert!(summarize_output(&text).chars().count() <= SUMMARY_LIMIT + 1);
        }
    }
}
