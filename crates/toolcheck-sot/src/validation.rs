//! Field-level checks shared by entities and adapters.
//!
//! Helpers return the problem as a message instead of failing fast so that
//! adapters can collect every data-quality issue in a payload at once.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref DRIVE_PREFIX: Regex = Regex::new(r"^[A-Za-z]:[\\/]").unwrap();
}

/// True when `value` is not a clean repository-relative path.
///
/// Flags absolute (`/`, `~`), drive-rooted (`C:\`), `./`-prefixed,
/// `..`-containing and backslash-containing values. The empty string is not
/// considered invalid.
pub fn is_invalid_path(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.starts_with('/') || value.starts_with('~') || value.starts_with('\\') {
        return true;
    }
    if DRIVE_PREFIX.is_match(value) {
        return true;
    }
    if value.starts_with("./") {
        return true;
    }
    if value.contains('\\') {
        return true;
    }
    value.split('/').any(|segment| segment == "..")
}

/// True for a non-empty path that [`is_invalid_path`] accepts.
pub fn is_repo_relative_path(value: &str) -> bool {
    !value.is_empty() && !is_invalid_path(value)
}

/// Normalize a file path reported by a tool into repo-relative form.
///
/// Converts separators, strips a leading `./` and, when given, the absolute
/// repository root the tool was pointed at.
pub fn normalize_file_path(raw: &str, repo_root: Option<&Path>) -> String {
    let mut path = raw.trim().replace('\\', "/");

    if let Some(root) = repo_root {
        let root = root.to_string_lossy().replace('\\', "/");
        let root = root.trim_end_matches('/');
        if !root.is_empty() {
            if let Some(rest) = path.strip_prefix(root) {
                path = rest.trim_start_matches('/').to_string();
            }
        }
    }

    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

/// Like [`normalize_file_path`], but the repository root maps to `"."`.
pub fn normalize_dir_path(raw: &str, repo_root: Option<&Path>) -> String {
    let path = normalize_file_path(raw, repo_root);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        ".".to_string()
    } else {
        path.to_string()
    }
}

/// Report a missing or null `field` on a JSON object.
pub fn check_required(record: &Value, field: &str, context: &str) -> Option<String> {
    match record.get(field) {
        None => Some(format!("{}: missing required field {}", context, field)),
        Some(Value::Null) => Some(format!("{}: {} is null", context, field)),
        Some(_) => None,
    }
}

pub fn check_non_negative(value: i64, field: &str, context: &str) -> Option<String> {
    if value < 0 {
        Some(format!("{}: {} must be >= 0 (got {})", context, field, value))
    } else {
        None
    }
}

/// Line ranges are 1-based and inclusive.
pub fn check_line_range(start: i64, end: i64, context: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if start < 1 {
        errors.push(format!("{}: line_start must be >= 1 (got {})", context, start));
    }
    if end < 1 {
        errors.push(format!("{}: line_end must be >= 1 (got {})", context, end));
    }
    if start >= 1 && end >= 1 && start > end {
        errors.push(format!(
            "{}: line_start {} is after line_end {}",
            context, start, end
        ));
    }
    errors
}

/// Parse an ISO-8601 timestamp. Values without an offset are read as UTC.
pub fn parse_iso8601(timestamp: &str) -> Option<DateTime<Utc>> {
    let normalized = timestamp.replace('Z', "+00:00");
    let with_offset = DateTime::parse_from_rfc3339(&normalized)
        .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%:z"))
        .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%:z"));
    if let Ok(parsed) = with_offset {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Validate `instance` against a JSON Schema document.
///
/// Returns every violation, each with its instance location.
pub fn validate_json_schema(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::options()
        .build(schema)
        .map_err(|e| vec![format!("Failed to compile schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Integer field with a default when absent or not a number.
pub fn int_field(record: &Value, field: &str, default: i64) -> i64 {
    record.get(field).and_then(Value::as_i64).unwrap_or(default)
}

pub fn opt_int_field(record: &Value, field: &str) -> Option<i64> {
    record.get(field).and_then(Value::as_i64)
}

pub fn str_field<'v>(record: &'v Value, field: &str) -> Option<&'v str> {
    record.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_invalid_path_cases() {
        assert!(is_invalid_path("/abs/path"));
        assert!(is_invalid_path("C:\\win\\path"));
        assert!(is_invalid_path("C:/win/path"));
        assert!(is_invalid_path("./rel/path"));
        assert!(is_invalid_path("a/../b"));
        assert!(is_invalid_path("a\\b"));
        assert!(is_invalid_path("~/notes.txt"));
    }

    #[test]
    fn test_valid_relative_paths() {
        assert!(!is_invalid_path("src/tools/scc/output.json"));
        assert!(!is_invalid_path("README.md"));
        assert!(!is_invalid_path(""));
        assert!(!is_invalid_path("a/..b/c"));
    }

    #[test]
    fn test_repo_relative_rejects_empty() {
        assert!(!is_repo_relative_path(""));
        assert!(is_repo_relative_path("src/app.py"));
        assert!(is_repo_relative_path("."));
    }

    #[test]
    fn test_normalize_file_path_strips_root_and_dot() {
        let root = Path::new("/tmp/repos/synthetic");
        assert_eq!(
            normalize_file_path("/tmp/repos/synthetic/src/app.py", Some(root)),
            "src/app.py"
        );
        assert_eq!(normalize_file_path("./src/app.py", None), "src/app.py");
        assert_eq!(normalize_file_path("src\\util\\x.py", None), "src/util/x.py");
    }

    #[test]
    fn test_normalize_dir_path_root_is_dot() {
        let root = Path::new("/tmp/repo");
        assert_eq!(normalize_dir_path("/tmp/repo", Some(root)), ".");
        assert_eq!(normalize_dir_path("./", None), ".");
        assert_eq!(normalize_dir_path("src/", None), "src");
    }

    #[test]
    fn test_check_required() {
        let record = json!({"path": "a.py", "name": null});
        assert!(check_required(&record, "path", "files[0]").is_none());
        assert_eq!(
            check_required(&record, "name", "files[0]").unwrap(),
            "files[0]: name is null"
        );
        assert!(check_required(&record, "ccn", "files[0]")
            .unwrap()
            .contains("missing required field ccn"));
    }

    #[test]
    fn test_check_line_range() {
        assert!(check_line_range(1, 1, "f").is_empty());
        assert_eq!(check_line_range(0, 5, "f").len(), 1);
        assert_eq!(check_line_range(9, 3, "f").len(), 1);
    }

    #[test]
    fn test_parse_iso8601_reads_naive_as_utc() {
        let naive = parse_iso8601("2026-01-15T10:31:00").unwrap();
        let zulu = parse_iso8601("2026-01-15T10:31:00Z").unwrap();
        assert_eq!(naive, zulu);
        assert_eq!(
            parse_iso8601("2026-01-15T12:31:00+02:00").unwrap(),
            zulu
        );
        assert!(parse_iso8601("not a date").is_none());
    }

    #[test]
    fn test_validate_json_schema_reports_location() {
        let schema = json!({
            "type": "object",
            "required": ["metadata"],
            "properties": {"metadata": {"type": "object"}}
        });
        assert!(validate_json_schema(&schema, &json!({"metadata": {}})).is_ok());

        let errors = validate_json_schema(&schema, &json!({"metadata": 3})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("/metadata"));
    }

    proptest! {
        #[test]
        fn prop_absolute_paths_are_invalid(tail in "[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
            let absolute = format!("/{}", tail);
            prop_assert!(is_invalid_path(&absolute));
            prop_assert!(is_repo_relative_path(&tail));
        }

        #[test]
        fn prop_normalize_is_idempotent(path in "(\\./)?[a-z]{1,6}(/[a-z]{1,6}){0,3}") {
            let once = normalize_file_path(&path, None);
            prop_assert_eq!(normalize_file_path(&once, None), once.clone());
            prop_assert!(!is_invalid_path(&once));
        }
    }
}
