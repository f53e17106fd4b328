//! Cross-tool join hygiene in downstream SQL.
//!
//! `run_pk` values are allocated per tool run, so equating the `run_pk` of
//! two different tools' tables never matches. Queries spanning tools must
//! correlate through `collection_run_id`, a tool-specific `*_run_pk`
//! column, or `lz_tool_runs`.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use super::{walk_files, ToolContext};
use crate::model::{CheckResult, Severity};

/// Table-name fragments identifying the tool that owns a table.
const TOOL_TABLE_PATTERNS: &[(&str, &[&str])] = &[
    ("scc", &["scc_file_metrics", "scc_directory", "rollup_scc_"]),
    ("lizard", &["lizard_file_metrics", "lizard_function", "rollup_lizard_"]),
    ("layout-scanner", &["layout_files", "layout_directories", "rollup_layout_"]),
    ("semgrep", &["semgrep_smells", "semgrep_file_metrics", "rollup_semgrep_"]),
    ("roslyn-analyzers", &["roslyn_violations", "roslyn_file_metrics", "rollup_roslyn_"]),
    ("sonarqube", &["sonarqube_issues", "sonarqube_file_metrics", "rollup_sonarqube_"]),
    ("trivy", &["trivy_vulnerabilities", "trivy_targets", "trivy_iac", "rollup_trivy_"]),
    ("git-sizer", &["git_sizer_metrics", "git_sizer_violations", "git_sizer_lfs"]),
    ("gitleaks", &["gitleaks_secrets", "rollup_gitleaks_"]),
];

const UNKNOWN: &str = "unknown";
const CTE: &str = "cte";
const MAX_EVIDENCE: usize = 10;

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern).case_insensitive(true).build().unwrap()
}

lazy_static! {
    static ref RUN_PK_JOIN: Regex = ci(r"\b(\w+)\.run_pk\s*=\s*(\w+)\.run_pk\b");
    static ref TABLE_ALIAS: Regex = ci(r"\b(?:from|join)\s+(\w+)\s+(?:as\s+)?(\w+)\b");
    static ref CTE_NAME: Regex = ci(r"\b(\w+)\s+as\s*\(");
    static ref CORRELATED: Regex = ci(
        r"(?:collection_run_id|lz_tool_runs|scc_run_pk|lizard_run_pk|semgrep_run_pk|layout_run_pk|trivy_run_pk|roslyn_run_pk|sonarqube_run_pk|git_sizer_run_pk|gitleaks_run_pk)"
    );
}

fn tool_for_table(table: &str) -> Option<&'static str> {
    let table = table.to_lowercase();
    TOOL_TABLE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| table.contains(p)))
        .map(|(tool, _)| *tool)
}

/// Tools whose tables appear anywhere in `sql`.
pub fn tools_in_sql(sql: &str) -> BTreeSet<&'static str> {
    let lower = sql.to_lowercase();
    TOOL_TABLE_PATTERNS
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(tool, _)| *tool)
        .collect()
}

/// Alias (lowercased) → owning tool, `unknown`, or `cte`.
pub fn table_aliases(sql: &str) -> BTreeMap<String, &'static str> {
    let mut aliases = BTreeMap::new();
    for caps in TABLE_ALIAS.captures_iter(sql) {
        if let (Some(table), Some(alias)) = (caps.get(1), caps.get(2)) {
            let tool = tool_for_table(table.as_str()).unwrap_or(UNKNOWN);
            aliases.insert(alias.as_str().to_lowercase(), tool);
        }
    }
    for caps in CTE_NAME.captures_iter(sql) {
        if let Some(name) = caps.get(1) {
            aliases.insert(name.as_str().to_lowercase(), CTE);
        }
    }
    aliases
}

/// Direct `a.run_pk = b.run_pk` joins between different tools in one file.
pub fn join_issues_in_file(file_name: &str, sql: &str) -> Vec<String> {
    if tools_in_sql(sql).len() < 2 || CORRELATED.is_match(sql) {
        return Vec::new();
    }
    let aliases = table_aliases(sql);
    let mut issues = Vec::new();
    for caps in RUN_PK_JOIN.captures_iter(sql) {
        let (Some(whole), Some(left), Some(right)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let left = left.as_str().to_lowercase();
        let right = right.as_str().to_lowercase();
        if left == right {
            continue;
        }
        let left_tool = aliases.get(&left).copied().unwrap_or(UNKNOWN);
        let right_tool = aliases.get(&right).copied().unwrap_or(UNKNOWN);
        if left_tool == right_tool || left_tool == UNKNOWN || right_tool == UNKNOWN {
            continue;
        }
        let line = sql[..whole.start()].matches('\n').count() + 1;
        issues.push(format!(
            "{}:{}: Direct run_pk join between '{}' ({}) and '{}' ({}) - use collection_run_id or tool-specific run_pk columns instead",
            file_name, line, left, left_tool, right, right_tool
        ));
    }
    issues
}

/// `sql.cross_tool_join_patterns` over every `*.sql` under the configured
/// project SQL directories.
pub fn cross_tool_join_patterns(ctx: &ToolContext<'_>) -> CheckResult {
    const ID: &str = "sql.cross_tool_join_patterns";
    let mut issues = Vec::new();
    let mut checked = 0usize;

    for dir in &ctx.rules.common().sot_layout.sql_dirs {
        let dir = ctx.project_path(dir);
        for file in walk_files(&dir) {
            if file.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            checked += 1;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match fs::read_to_string(&file) {
                Ok(sql) => issues.extend(join_issues_in_file(&name, &sql)),
                Err(e) => issues.push(format!("{}: Error reading file: {}", name, e)),
            }
        }
    }

    if issues.is_empty() {
        CheckResult::pass(
            ID,
            Severity::High,
            format!("Cross-tool SQL joins use correct patterns ({} files checked)", checked),
        )
    } else {
        let message = format!("Found {} incorrect cross-tool run_pk join(s)", issues.len());
        issues.truncate(MAX_EVIDENCE);
        CheckResult::fail(ID, Severity::High, message).with_evidence(issues)
    }
}
