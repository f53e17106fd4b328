//! Checks over a materialized output document: path hygiene, metadata
//! formats, and internal consistency of the data section.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::schema_contract::REQUIRED_METADATA_FIELDS;
use super::{display_value, is_blank, json_type_name, ToolContext};
use crate::model::{CheckResult, Severity};
use toolcheck_sot::validation::{is_invalid_path, parse_iso8601};

lazy_static! {
    static ref API_ENDPOINT: Regex = Regex::new(r"^/(?:api|v\d+|graphql)/").unwrap();
    static ref DRIVE_ROOT: Regex = Regex::new(r"^[A-Za-z]:[/\\]").unwrap();
    static ref SEMVER: Regex = Regex::new(r"^\d+\.\d+\.\d+$").unwrap();
    static ref COMMIT_SHA: Regex = Regex::new(r"^[0-9a-fA-F]{40}$").unwrap();
}

const URL_SCHEMES: [&str; 4] = ["http://", "https://", "ftp://", "file://"];
const REGEX_INDICATORS: [&str; 10] = [".*", "\\.", "?", "^", "[", "]", "(", ")", "|", "\\\\"];
const PATH_KEYS: [&str; 6] = ["path", "file", "dir", "folder", "location", "source"];
const EXCLUDED_KEYS: [&str; 9] = ["endpoint", "url", "uri", "href", "schema", "ref", "api", "snapshot", "repo"];

const MAX_FIELD_ISSUES_PER_SECTION: usize = 5;
const MAX_EVIDENCE: usize = 15;

/// Heuristic for string values under keys that do not name a path.
///
/// Only absolute, multi-segment strings qualify; URLs, API routes,
/// schema refs, regexes and `key:pattern/` strings never do.
pub fn looks_like_file_path(value: &str) -> bool {
    if value.is_empty() || URL_SCHEMES.iter().any(|s| value.starts_with(s)) {
        return false;
    }
    if API_ENDPOINT.is_match(value) || value.starts_with(['$', '#']) {
        return false;
    }
    if REGEX_INDICATORS.iter().any(|ind| value.contains(ind)) {
        return false;
    }
    if let Some((key, rest)) = value.split_once(':') {
        // Single-character left sides are drive letters.
        let key_len = key.chars().count();
        if (2..20).contains(&key_len) && rest.contains('/') {
            return false;
        }
    }

    let absolute = value.starts_with(['/', '\\', '~']) || DRIVE_ROOT.is_match(value);
    let depth = value.matches('/').count() >= 2 || value.contains('\\');
    absolute && depth
}

/// String values in `doc` that name or look like filesystem paths.
pub fn collect_path_like_values(doc: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_into(doc, &mut paths);
    paths
}

fn collect_into(node: &Value, paths: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                let key = key.to_lowercase();
                let excluded = EXCLUDED_KEYS.iter().any(|k| key.contains(k));
                if !excluded {
                    if let Value::String(s) = value {
                        if PATH_KEYS.iter().any(|k| key.contains(k)) || looks_like_file_path(s) {
                            paths.push(s.clone());
                        }
                    }
                }
                collect_into(value, paths);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_into(item, paths)),
        _ => {}
    }
}

/// ISO-8601 date or date-time, with or without offset; `Z` is UTC.
pub fn is_valid_iso8601(timestamp: &str) -> bool {
    parse_iso8601(timestamp).is_some()
}


/// Integer coercion for count fields: numbers truncate, numeric strings parse.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn present<'v>(data: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
    data.get(key).filter(|v| !v.is_null())
}

fn count_list_issues(data: &Map<String, Value>, count_field: &str, list_field: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let (Some(count), Some(list)) = (present(data, count_field), present(data, list_field)) else {
        return issues;
    };
    let Some(items) = list.as_array() else {
        return issues;
    };
    match coerce_int(count) {
        Some(expected) => {
            if expected != items.len() as i64 {
                issues.push(format!(
                    "{}={} but {} has {} items",
                    count_field,
                    expected,
                    list_field,
                    items.len()
                ));
            }
            if expected > 0 && items.is_empty() {
                issues.push(format!("{}={} but {} is empty", count_field, expected, list_field));
            }
        }
        None => issues.push(format!(
            "{} is not a valid integer: {}",
            count_field,
            display_value(count)
        )),
    }
    issues
}

fn required_field_issues(items: &[Value], fields: &[String], section: &str) -> Vec<String> {
    let mut issues = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Some(record) = item.as_object() else {
            issues.push(format!("{}[{}] is not a dict", section, i));
            continue;
        };
        for field in fields {
            match record.get(field) {
                None => issues.push(format!("{}[{}] missing required field: {}", section, i, field)),
                Some(Value::Null) => issues.push(format!("{}[{}].{} is null", section, i, field)),
                Some(_) => {}
            }
        }
    }
    issues
}

/// Recursive counts must be at least the matching direct counts.
fn aggregate_issues(data: &Map<String, Value>) -> Vec<String> {
    let base = |key: &str, marker: &str| {
        key.to_lowercase()
            .replace(marker, "")
            .replace("count", "")
            .trim_matches('_')
            .to_string()
    };
    let with = |marker: &'static str| {
        data.keys()
            .filter(move |k| {
                let lower = k.to_lowercase();
                lower.contains(marker) && lower.contains("count")
            })
            .collect::<Vec<_>>()
    };

    let mut issues = Vec::new();
    for rec in with("recursive") {
        let rec_base = base(rec, "recursive");
        for direct in with("direct") {
            if base(direct, "direct") != rec_base {
                continue;
            }
            let rec_val = data.get(rec).and_then(coerce_int);
            let dir_val = data.get(direct).and_then(coerce_int);
            if let (Some(r), Some(d)) = (rec_val, dir_val) {
                if r < d {
                    issues.push(format!("Rollup invariant violated: {}={} < {}={}", rec, r, direct, d));
                }
            }
        }
    }
    issues
}

pub struct OutputContentValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> OutputContentValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    /// `output.paths`
    pub fn paths(&self, output: &Value) -> CheckResult {
        const ID: &str = "output.paths";
        let invalid: Vec<String> = collect_path_like_values(output)
            .into_iter()
            .filter(|p| is_invalid_path(p))
            .collect();
        if invalid.is_empty() {
            CheckResult::pass(ID, Severity::High, "Path values are repo-relative")
        } else {
            CheckResult::fail(ID, Severity::High, "Invalid path values detected").with_evidence(invalid)
        }
    }

    /// `output.required_fields`, `output.schema_version` and, when both
    /// names are present, `output.tool_name_match`.
    pub fn metadata(&self, output: &Value) -> Vec<CheckResult> {
        let metadata = output.get("metadata");
        let field = |name: &str| metadata.and_then(|m| m.get(name));
        let mut checks = Vec::new();

        let missing: Vec<&str> = REQUIRED_METADATA_FIELDS
            .iter()
            .copied()
            .filter(|f| is_blank(field(f)))
            .collect();
        checks.push(if missing.is_empty() {
            CheckResult::pass("output.required_fields", Severity::High, "Required metadata fields present")
        } else {
            CheckResult::fail("output.required_fields", Severity::High, "Missing required metadata fields")
                .with_evidence(missing)
        });

        let version = field("schema_version").map(display_value).unwrap_or_default();
        let check = if !version.is_empty() && SEMVER.is_match(&version) {
            CheckResult::pass("output.schema_version", Severity::Medium, "Schema version is semver")
        } else {
            CheckResult::fail("output.schema_version", Severity::Medium, "Schema version is not semver")
        };
        checks.push(check.with_evidence([version]));

        let tool_name = field("tool_name");
        let data_tool = output.pointer("/data/tool");
        if !is_blank(tool_name) && !is_blank(data_tool) {
            let (tool_name, data_tool) = (tool_name.unwrap_or(&Value::Null), data_tool.unwrap_or(&Value::Null));
            let evidence = [display_value(tool_name), display_value(data_tool)];
            let check = if tool_name == data_tool {
                CheckResult::pass("output.tool_name_match", Severity::Low, "Tool name matches data.tool")
            } else {
                CheckResult::fail("output.tool_name_match", Severity::Low, "Tool name mismatch")
            };
            checks.push(check.with_evidence(evidence));
        }
        checks
    }

    /// `output.metadata_consistency`
    pub fn metadata_consistency(&self, output: &Value) -> CheckResult {
        const ID: &str = "output.metadata_consistency";
        let metadata = output.get("metadata");
        let field = |name: &str| metadata.and_then(|m| m.get(name)).filter(|v| !is_blank(Some(*v)));
        let mut issues = Vec::new();

        if let Some(commit) = field("commit").map(display_value) {
            if !COMMIT_SHA.is_match(&commit) {
                issues.push(format!("commit is not 40-hex SHA: {}", commit));
            }
        }
        if let Some(timestamp) = field("timestamp").map(display_value) {
            if !is_valid_iso8601(&timestamp) {
                issues.push(format!("timestamp is not valid ISO8601: {}", timestamp));
            }
        }
        let data_version = output.pointer("/data/tool_version").filter(|v| !is_blank(Some(*v)));
        if let (Some(meta), Some(data)) = (field("tool_version").map(display_value), data_version.map(display_value)) {
            if meta != data {
                issues.push(format!("tool_version mismatch: metadata={}, data={}", meta, data));
            }
        }

        if issues.is_empty() {
            CheckResult::pass(ID, Severity::Medium, "Metadata formats are consistent")
        } else {
            CheckResult::fail(ID, Severity::Medium, "Metadata format/consistency issues").with_evidence(issues)
        }
    }

    /// `output.data_completeness`
    pub fn data_completeness(&self, output: &Value) -> CheckResult {
        const ID: &str = "output.data_completeness";
        let empty = Map::new();
        let data = match output.get("data") {
            None => &empty,
            Some(Value::Object(map)) => map,
            Some(other) => {
                return CheckResult::fail(ID, Severity::High, "Data field is not a dictionary")
                    .with_evidence([format!("data type: {}", json_type_name(other))])
            }
        };
        let rules = &self.ctx.rules.common().data_completeness_rules;
        let mut issues = Vec::new();

        for pair in &rules.count_list_pairs {
            issues.extend(count_list_issues(data, &pair.count_field, &pair.list_field));
        }

        for (section, fields) in rules.required_fields_for(Some(&self.ctx.tool_name)) {
            let Some(items) = data.get(&section).and_then(Value::as_array) else {
                continue;
            };
            if items.is_empty() {
                continue;
            }
            let found = required_field_issues(items, &fields, &section);
            let extra = found.len().saturating_sub(MAX_FIELD_ISSUES_PER_SECTION);
            issues.extend(found.into_iter().take(MAX_FIELD_ISSUES_PER_SECTION));
            if extra > 0 {
                issues.push(format!("... {} more issues in {}", extra, section));
            }
        }

        issues.extend(aggregate_issues(data));

        if issues.is_empty() {
            CheckResult::pass(ID, Severity::High, "Data completeness validated")
        } else {
            issues.truncate(MAX_EVIDENCE);
            CheckResult::fail(ID, Severity::High, "Data completeness issues detected").with_evidence(issues)
        }
    }

    /// `output.path_consistency`
    pub fn path_consistency(&self, output: &Value) -> CheckResult {
        const ID: &str = "output.path_consistency";
        let Some(data) = output.get("data").and_then(Value::as_object) else {
            return CheckResult::pass(ID, Severity::Medium, "No path fields found to validate");
        };
        let rules = &self.ctx.rules.common().path_consistency_rules;

        let mut sections = 0usize;
        let mut all_paths: Vec<&str> = Vec::new();
        for (section, fields) in &rules.section_path_fields {
            let Some(items) = data.get(section).and_then(Value::as_array) else {
                continue;
            };
            let before = all_paths.len();
            for record in items.iter().filter_map(Value::as_object) {
                for field in fields {
                    if let Some(path) = record.get(field).and_then(Value::as_str).filter(|p| !p.is_empty()) {
                        all_paths.push(path);
                    }
                }
            }
            if all_paths.len() > before {
                sections += 1;
            }
        }
        if all_paths.is_empty() {
            return CheckResult::pass(ID, Severity::Medium, "No path fields found to validate");
        }

        let mut issues = Vec::new();
        let non_relative = all_paths.iter().filter(|p| is_invalid_path(p)).count();
        if non_relative > 0 {
            issues.push(format!("Found {} non-repo-relative paths", non_relative));
        }
        let posix = all_paths.iter().filter(|p| p.contains('/') && !p.contains('\\')).count();
        let windows = all_paths.iter().filter(|p| p.contains('\\')).count();
        if posix > 0 && windows > 0 {
            issues.push(format!("Mixed path separators: {} POSIX, {} Windows", posix, windows));
        }
        issues.extend(self.reference_issues(data));

        if issues.is_empty() {
            CheckResult::pass(ID, Severity::Medium, "Path consistency validated").with_evidence([format!(
                "Checked {} paths across {} sections",
                all_paths.len(),
                sections
            )])
        } else {
            issues.truncate(MAX_EVIDENCE);
            CheckResult::fail(ID, Severity::Medium, "Path consistency issues detected").with_evidence(issues)
        }
    }

    /// `file_path` references in finding-like sections that are absent from
    /// `data.files`. Skipped when there is no files list.
    fn reference_issues(&self, data: &Map<String, Value>) -> Vec<String> {
        let known: BTreeSet<&str> = data
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| {
                        f.get("path")
                            .and_then(Value::as_str)
                            .filter(|p| !p.is_empty())
                            .or_else(|| f.get("file_path").and_then(Value::as_str))
                    })
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if known.is_empty() {
            return Vec::new();
        }

        let rules = &self.ctx.rules.common().path_consistency_rules;
        let mut issues = Vec::new();
        for section in &rules.reference_sections {
            let Some(items) = data.get(section).and_then(Value::as_array) else {
                continue;
            };
            for (i, item) in items.iter().enumerate() {
                let Some(path) = item.get("file_path").and_then(Value::as_str).filter(|p| !p.is_empty()) else {
                    continue;
                };
                if known.contains(path) {
                    continue;
                }
                if issues.len() < rules.max_reference_issues {
                    issues.push(format!("{}[{}].file_path '{}' not found in files list", section, i, path));
                } else {
                    issues.push("... (more path reference issues omitted)".to_string());
                    return issues;
                }
            }
        }
        issues
    }
}
