//! Multi-tool reports.
//!
//! [`ReportBuilder`] scans every tool under a tools root (or a single tool)
//! and produces a [`Report`], which renders to pretty JSON with sorted keys
//! and to a Markdown summary with per-tool detail tables.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use toolcheck_core::{CheckResult, RulesRegistry, Status, ToolResult};

use crate::orchestrator::{ExecutionOrchestrator, ScanOptions};

/// Rows shown in the slowest-checks table.
const SLOWEST_CHECKS: usize = 10;

/// Errors from report discovery and output.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read tools root {path}: {source}")]
    ToolsRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Pass/fail tally over all scanned tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub tool_count: usize,
    pub passed: usize,
    pub failed: usize,
}

/// A complete compliance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// UTC ISO-8601
    pub generated_at: String,
    pub tools_root: String,
    pub summary: ReportSummary,
    pub tools: Vec<ToolResult>,
}

/// Tool package directories under `tools_root`: subdirectories holding a
/// `Makefile`, sorted by name.
pub fn find_tools(tools_root: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let entries = fs::read_dir(tools_root).map_err(|source| ReportError::ToolsRoot {
        path: tools_root.display().to_string(),
        source,
    })?;
    let mut tools: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join("Makefile").exists())
        .collect();
    tools.sort();
    Ok(tools)
}

/// Parse `name=path,name=path`. Blank items and items without `=` are
/// ignored; only the first `=` splits.
pub fn parse_venv_map(raw: &str) -> BTreeMap<String, PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| item.split_once('='))
        .map(|(name, path)| (name.trim().to_string(), PathBuf::from(path.trim())))
        .collect()
}

/// Scans tools and assembles a [`Report`].
pub struct ReportBuilder<'r> {
    rules: &'r RulesRegistry,
    options: ScanOptions,
    venv_map: BTreeMap<String, PathBuf>,
    project_root: Option<PathBuf>,
}

impl<'r> ReportBuilder<'r> {
    pub fn new(rules: &'r RulesRegistry, options: ScanOptions) -> Self {
        Self {
            rules,
            options,
            venv_map: BTreeMap::new(),
            project_root: None,
        }
    }

    /// Per-tool venv overrides, keyed by tool directory name.
    pub fn venv_map(mut self, venv_map: BTreeMap<String, PathBuf>) -> Self {
        self.venv_map = venv_map;
        self
    }

    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Scan every tool under `tools_root`.
    pub fn build(&self, tools_root: &Path) -> Result<Report, ReportError> {
        let tools = find_tools(tools_root)?;
        tracing::info!(tools_root = %tools_root.display(), count = tools.len(), "Discovered tools");
        Ok(self.assemble(tools_root, &tools))
    }

    /// Scan only `tool_path`; the report's root is its parent.
    pub fn build_single(&self, tool_path: &Path) -> Report {
        let tools_root = tool_path.parent().unwrap_or(tool_path);
        self.assemble(tools_root, &[tool_path.to_path_buf()])
    }

    fn assemble(&self, tools_root: &Path, tools: &[PathBuf]) -> Report {
        let results: Vec<ToolResult> = tools.iter().map(|tool| self.scan_tool(tool)).collect();
        let passed = results.iter().filter(|r| r.status == Status::Pass).count();
        Report {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            tools_root: tools_root.display().to_string(),
            summary: ReportSummary {
                tool_count: results.len(),
                passed,
                failed: results.len() - passed,
            },
            tools: results,
        }
    }

    fn scan_tool(&self, tool_root: &Path) -> ToolResult {
        let name = tool_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let options = match self.venv_map.get(&name) {
            Some(venv) => self.options.with_venv(Some(venv.clone())),
            None => self.options.clone(),
        };
        let orchestrator = ExecutionOrchestrator::new(self.rules, options);
        let orchestrator = match &self.project_root {
            Some(root) => orchestrator.with_project_root(root),
            None => orchestrator,
        };
        orchestrator.scan(tool_root)
    }
}

impl Report {
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }

    /// `(tool, check)` for every failed check, in report order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &CheckResult)> {
        self.tools
            .iter()
            .flat_map(|t| t.failed_checks().map(move |c| (t.name.as_str(), c)))
    }

    /// Pretty JSON with object keys sorted.
    pub fn to_json(&self) -> Result<String, ReportError> {
        let value = sort_keys(serde_json::to_value(self)?);
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        write_file(path, &self.to_json()?)
    }

    pub fn write_markdown(&self, path: &Path) -> Result<(), ReportError> {
        write_file(path, &self.to_markdown())
    }

    pub fn to_markdown(&self) -> String {
        let mut lines: Vec<String> = vec![
            "# Tool Compliance Report".to_string(),
            String::new(),
            format!("Generated: `{}`", self.generated_at),
            String::new(),
            format!(
                "Summary: {} passed, {} failed, {} total",
                self.summary.passed, self.summary.failed, self.summary.tool_count
            ),
            String::new(),
            "| Tool | Status | Checks Passed | Checks Failed | Failed Check IDs |".to_string(),
            "| --- | --- | --- | --- | --- |".to_string(),
        ];
        for tool in &self.tools {
            let failed: Vec<&str> = tool.failed_checks().map(|c| c.check_id.as_str()).collect();
            let passed = tool.checks.iter().filter(|c| c.passed()).count();
            let ids = if failed.is_empty() { "-".to_string() } else { failed.join(", ") };
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                tool.name,
                tool.status,
                passed,
                failed.len(),
                ids
            ));
        }
        lines.push(String::new());

        lines.extend(self.performance_lines());

        for tool in &self.tools {
            lines.push(format!("## {}", tool.name));
            lines.push(String::new());
            lines.push(
                "| Check ID | Status | Severity | Duration (ms) | Message | Evidence | Stdout | Stderr |"
                    .to_string(),
            );
            lines.push("| --- | --- | --- | --- | --- | --- | --- | --- |".to_string());
            lines.extend(tool.checks.iter().map(check_row));
            lines.push(String::new());
        }

        let mut out = lines.join("\n").trim_end().to_string();
        out.push('\n');
        out
    }

    /// Slowest checks overall and total time per tool; empty when nothing
    /// was timed.
    fn performance_lines(&self) -> Vec<String> {
        let mut timed: Vec<(&str, &str, f64)> = Vec::new();
        let mut totals: Vec<(&str, f64)> = Vec::new();
        for tool in &self.tools {
            let durations: Vec<(&str, f64)> = tool
                .checks
                .iter()
                .filter_map(|c| c.duration_ms.map(|d| (c.check_id.as_str(), d)))
                .collect();
            if durations.is_empty() {
                continue;
            }
            totals.push((tool.name.as_str(), durations.iter().map(|(_, d)| d).sum()));
            timed.extend(durations.into_iter().map(|(id, d)| (tool.name.as_str(), id, d)));
        }
        if timed.is_empty() {
            return Vec::new();
        }
        timed.sort_by(|a, b| b.2.total_cmp(&a.2));
        totals.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut lines = vec![
            "## Performance Summary".to_string(),
            String::new(),
            "### Slowest Checks".to_string(),
            String::new(),
            "| Tool | Check ID | Duration (ms) |".to_string(),
            "| --- | --- | --- |".to_string(),
        ];
        for (tool, check_id, ms) in timed.iter().take(SLOWEST_CHECKS) {
            lines.push(format!("| {} | `{}` | {:.2} |", tool, check_id, ms));
        }
        lines.push(String::new());
        lines.push("### Total Time Per Tool".to_string());
        lines.push(String::new());
        lines.push("| Tool | Total (s) |".to_string());
        lines.push("| --- | --- |".to_string());
        for (tool, ms) in totals {
            lines.push(format!("| {} | {:.2} |", tool, ms / 1000.0));
        }
        lines.push(String::new());
        lines
    }
}

/// Rebuild objects with their keys in lexical order.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Table cells cannot hold newlines.
/// One-line table cell; pipes are escaped so they cannot split the row.
fn cell(text: &str) -> String {
    text.replace('\n', " ").trim().replace('|', "\\|")
}

fn or_dash(text: Option<&str>) -> String {
    match text {
        Some(t) if !t.is_empty() => cell(t),
        _ => "-".to_string(),
    }
}

fn check_row(check: &CheckResult) -> String {
    let evidence = if check.evidence.is_empty() {
        "-".to_string()
    } else {
        cell(&check.evidence.join(", "))
    };
    let duration = check
        .duration_ms
        .map(|d| format!("{:.2}", d))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "| `{}` | {} | {} | {} | {} | {} | {} | {} |",
        check.check_id,
        check.status,
        check.severity,
        duration,
        cell(&check.message),
        evidence,
        or_dash(check.stdout_summary.as_deref()),
        or_dash(check.stderr_summary.as_deref()),
    )
}

fn write_file(path: &Path, contents: &str) -> Result<(), ReportError> {
    let io_err = |source| ReportError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolcheck_core::Severity;

    fn sample_report() -> Report {
        let scc = ToolResult::new(
            "scc",
            vec![
                CheckResult::pass("make.targets", Severity::High, "All required make targets present")
                    .with_duration(1.234),
                CheckResult::fail("run.analyze", Severity::Critical, "make analyze failed")
                    .with_evidence(["line one\nline two"])
                    .with_duration(2500.0)
                    .with_output("", "error: boom"),
            ],
        );
        let lizard = ToolResult::new(
            "lizard",
            vec![CheckResult::pass("structure.paths", Severity::High, "All required paths present").with_duration(4.0)],
        );
        Report {
            generated_at: "2026-01-15T10:30:00.000000Z".to_string(),
            tools_root: "src/tools".to_string(),
            summary: ReportSummary {
                tool_count: 2,
                passed: 1,
                failed: 1,
            },
            tools: vec![lizard, scc],
        }
    }

    #[test]
    fn test_parse_venv_map() {
        let map = parse_venv_map(" scc=/venvs/scc , ,bogus, lizard = /venvs/a=b ");
        assert_eq!(map.len(), 2);
        assert_eq!(map["scc"], PathBuf::from("/venvs/scc"));
        assert_eq!(map["lizard"], PathBuf::from("/venvs/a=b"));
        assert!(parse_venv_map("").is_empty());
    }

    #[test]
    fn test_find_tools_requires_makefile() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["scc", "lizard", "notes"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("scc/Makefile"), "all:\n").unwrap();
        fs::write(dir.path().join("lizard/Makefile"), "all:\n").unwrap();
        fs::write(dir.path().join("Makefile"), "all:\n").unwrap();

        let tools = find_tools(dir.path()).unwrap();
        let names: Vec<String> = tools
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["lizard", "scc"]);
    }

    #[test]
    fn test_find_tools_missing_root() {
        let err = find_tools(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ReportError::ToolsRoot { .. }));
    }

    #[test]
    fn test_json_keys_sorted() {
        let json = sample_report().to_json().unwrap();
        let generated = json.find("\"generated_at\"").unwrap();
        let summary = json.find("\"summary\"").unwrap();
        let tools_root = json.find("\"tools_root\"").unwrap();
        assert!(generated < summary && summary < tools_root);
        assert!(json.contains("\"status\": \"fail\""));
        assert!(json.contains("\"stdout_summary\": null"));
    }

    #[test]
    fn test_markdown_summary_table() {
        let md = sample_report().to_markdown();
        assert!(md.starts_with("# Tool Compliance Report\n\nGenerated: `2026-01-15T10:30:00.000000Z`\n"));
        assert!(md.contains("Summary: 1 passed, 1 failed, 2 total"));
        assert!(md.contains("| lizard | pass | 1 | 0 | - |"));
        assert!(md.contains("| scc | fail | 1 | 1 | run.analyze |"));
        assert!(md.ends_with('\n'));
    }

    #[test]
    fn test_markdown_performance_and_detail() {
        let md = sample_report().to_markdown();
        assert!(md.contains("| scc | `run.analyze` | 2500.00 |"));
        let slowest = md.find("`run.analyze` | 2500.00").unwrap();
        let next = md.find("| lizard | `structure.paths` | 4.00 |").unwrap();
        assert!(slowest < next);
        assert!(md.contains("| scc | 2.50 |"));
        assert!(md.contains(
            "| `run.analyze` | fail | critical | 2500.00 | make analyze failed | line one line two | - | error: boom |"
        ));
        assert!(md.contains("| `make.targets` | pass | high | 1.23 | All required make targets present | - | - | - |"));
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let check = CheckResult::fail("output.paths", Severity::High, "a | b")
            .with_evidence(["x|y"])
            .with_duration(1.0);
        assert_eq!(
            check_row(&check),
            "| `output.paths` | fail | high | 1.00 | a \\| b | x\\|y | - | - |"
        );
        assert_eq!(cell(" plain\ntext "), "plain text");
    }

    #[test]
    fn test_report_failures() {
        let report = sample_report();
        assert!(!report.all_passed());
        let failures: Vec<_> = report.failures().map(|(t, c)| (t, c.check_id.as_str())).collect();
        assert_eq!(failures, vec![("scc", "run.analyze")]);
    }
}
