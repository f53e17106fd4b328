//! Markdown document checks: required headings and the Rollup Validation
//! declaration in the strategy document.

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;

use super::ToolContext;
use crate::model::{CheckResult, Severity};

lazy_static! {
    static ref HEADING: Regex = Regex::new(r"^#{1,3}\s+(.+)$").unwrap();
}

const BLUEPRINT: &str = "BLUEPRINT.md";
const EVAL_STRATEGY: &str = "EVAL_STRATEGY.md";

/// Level 1-3 headings, trimmed, in document order.
pub fn extract_markdown_sections(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| HEADING.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// A `- ` or `* ` bullet. Bold and italic markers (`**`, `__`) are not.
pub fn is_markdown_list_item(line: &str) -> bool {
    let bytes = line.as_bytes();
    if bytes.len() < 2 || !matches!(bytes[0], b'-' | b'*') {
        return false;
    }
    if line.starts_with("**") || line.starts_with("__") {
        return false;
    }
    matches!(bytes[1], b' ' | b'\t')
}

/// Lines after the first heading mentioning "rollup validation".
fn rollup_section(content: &str) -> Option<Vec<&str>> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|line| {
        line.trim().starts_with('#') && line.to_lowercase().contains("rollup validation")
    })?;
    Some(lines[start + 1..].to_vec())
}

/// A heading or a `---` rule closes the Rollup Validation section.
fn ends_section(line: &str) -> bool {
    line.starts_with('#') || line == "---"
}

fn inline_items(line: &str) -> Vec<String> {
    line.split_once(':')
        .map(|(_, value)| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    Rollups,
    Tests,
}

/// `(rollups, tests)` declared in a Rollup Validation section body.
pub fn parse_rollup_validation(section_lines: &[&str]) -> (Vec<String>, Vec<String>) {
    let mut rollups = Vec::new();
    let mut tests = Vec::new();
    let mut current = None;

    for raw in section_lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.starts_with("rollups:") {
            current = Some(Block::Rollups);
            rollups.extend(inline_items(line));
            continue;
        }
        if lower.starts_with("tests:") {
            current = Some(Block::Tests);
            tests.extend(inline_items(line));
            continue;
        }
        if ends_section(line) {
            break;
        }
        let bullet = is_markdown_list_item(line);
        if current == Some(Block::Tests) && !bullet {
            break;
        }
        if bullet {
            let item = line[1..].trim();
            if item.is_empty() {
                continue;
            }
            match current {
                Some(Block::Rollups) => rollups.push(item.to_string()),
                Some(Block::Tests) => tests.push(item.to_string()),
                None => {}
            }
        }
    }
    (rollups, tests)
}

/// Rollup type names declared in a strategy document, empty when the
/// section is absent.
///
/// Looser than [`parse_rollup_validation`]: any `-`/`*` prefixed line in
/// the rollups block counts, and the block also ends at `Tests:`.
pub fn rollup_names(content: &str) -> Vec<String> {
    let Some(section) = rollup_section(content) else {
        return Vec::new();
    };
    let mut rollups = Vec::new();
    let mut in_rollups = false;
    for raw in section {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.starts_with("rollups:") {
            in_rollups = true;
            rollups.extend(inline_items(line));
            continue;
        }
        if lower.starts_with("tests:") || ends_section(line) {
            break;
        }
        if in_rollups && line.starts_with(['-', '*']) {
            let item = line[1..].trim();
            if !item.is_empty() {
                rollups.push(item.to_string());
            }
        }
    }
    rollups
}

pub struct DocsValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> DocsValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    fn required_sections(&self, check_id: &str, file: &str, severity: Severity, required: &[String]) -> CheckResult {
        let Ok(content) = fs::read_to_string(self.ctx.path(file)) else {
            return CheckResult::fail(check_id, severity, format!("{} missing", file)).with_evidence([file]);
        };
        let headings: Vec<String> = extract_markdown_sections(&content)
            .into_iter()
            .map(|h| h.to_lowercase())
            .collect();
        let missing: Vec<&String> = required
            .iter()
            .filter(|section| {
                let needle = section.to_lowercase();
                !headings.iter().any(|h| h.contains(&needle))
            })
            .collect();

        if missing.is_empty() {
            CheckResult::pass(check_id, severity, format!("{} has required sections", file))
        } else {
            CheckResult::fail(check_id, severity, format!("{} missing required sections", file))
                .with_evidence(missing.into_iter().cloned())
        }
    }

    /// `docs.blueprint_structure`
    pub fn blueprint_structure(&self) -> CheckResult {
        self.required_sections(
            "docs.blueprint_structure",
            BLUEPRINT,
            Severity::Medium,
            &self.ctx.rules.common().blueprint_required_sections,
        )
    }

    /// `docs.eval_strategy_structure`
    pub fn eval_strategy_structure(&self) -> CheckResult {
        self.required_sections(
            "docs.eval_strategy_structure",
            EVAL_STRATEGY,
            Severity::High,
            &self.ctx.rules.common().eval_strategy_required_sections,
        )
    }

    /// `evaluation.rollup_validation`: declared test paths must exist
    /// relative to the project root.
    pub fn rollup_validation(&self) -> CheckResult {
        const ID: &str = "evaluation.rollup_validation";
        let Ok(content) = fs::read_to_string(self.ctx.path(EVAL_STRATEGY)) else {
            return CheckResult::fail(ID, Severity::High, "EVAL_STRATEGY.md missing").with_evidence([EVAL_STRATEGY]);
        };
        let Some(section) = rollup_section(&content) else {
            return CheckResult::fail(ID, Severity::High, "Rollup Validation section not declared");
        };

        let (rollups, tests) = parse_rollup_validation(&section);
        let mut problems = Vec::new();
        // Repo-level tools may declare tests without any rollups.
        if rollups.is_empty() && tests.is_empty() {
            problems.push("Rollups or Tests list is required".to_string());
        }
        if tests.is_empty() {
            problems.push("Tests list is missing or empty".to_string());
        }
        let missing_tests: Vec<&str> = tests
            .iter()
            .map(String::as_str)
            .filter(|test| !self.ctx.project_path(test).exists())
            .collect();
        if !missing_tests.is_empty() {
            problems.push(format!("Missing test paths: {}", missing_tests.join(", ")));
        }

        if problems.is_empty() {
            CheckResult::pass(ID, Severity::High, "Rollup Validation declared with valid tests").with_evidence(tests)
        } else {
            CheckResult::fail(ID, Severity::High, "Rollup Validation section incomplete").with_evidence(problems)
        }
    }
}
