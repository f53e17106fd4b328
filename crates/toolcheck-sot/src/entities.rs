//! Landing-zone row types.
//!
//! Entities are plain immutable records: adapters build them once from a
//! tool payload, `validate()` them, and hand them to a repository. Field
//! names double as column names (except `ToolRun::commit`, stored in
//! `commit_sha`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repositories::PersistenceError;
use crate::validation::{check_line_range, check_non_negative, is_repo_relative_path};

/// A landing-zone record type.
pub trait Entity: Serialize + Default {
    /// Type name used by configuration (`tool_entities`).
    const NAME: &'static str;

    /// Entities expose no mutators once constructed.
    const IMMUTABLE: bool = true;

    /// Check row-level invariants before the row is written.
    fn validate(&self) -> Result<(), PersistenceError>;
}

fn invalid(entity: &str, problems: Vec<String>) -> Result<(), PersistenceError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(PersistenceError::InvalidEntity(format!(
            "{}: {}",
            entity,
            problems.join("; ")
        )))
    }
}

fn require_run_pk(run_pk: i64, problems: &mut Vec<String>) {
    if run_pk <= 0 {
        problems.push(format!("run_pk must be positive (got {})", run_pk));
    }
}

fn require_relative(path: &str, problems: &mut Vec<String>) {
    if !is_repo_relative_path(path) {
        problems.push(format!("relative_path is not repo-relative: '{}'", path));
    }
}

fn require_non_empty(value: &str, field: &str, problems: &mut Vec<String>) {
    if value.trim().is_empty() {
        problems.push(format!("{} must not be empty", field));
    }
}

fn require_non_negative(value: Option<i64>, field: &str, problems: &mut Vec<String>) {
    if let Some(msg) = value.and_then(|v| check_non_negative(v, field, "value")) {
        problems.push(msg);
    }
}

/// One tool execution inside a collection run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolRun {
    pub collection_run_id: String,
    pub repo_id: String,
    pub run_id: String,
    pub tool_name: String,
    pub tool_version: String,
    pub schema_version: String,
    pub branch: String,
    pub commit: String,
    pub timestamp: DateTime<Utc>,
}

impl Entity for ToolRun {
    const NAME: &'static str = "ToolRun";

    fn validate(&self) -> Result<(), PersistenceError> {
        let mut problems = Vec::new();
        require_non_empty(&self.collection_run_id, "collection_run_id", &mut problems);
        require_non_empty(&self.repo_id, "repo_id", &mut problems);
        require_non_empty(&self.run_id, "run_id", &mut problems);
        require_non_empty(&self.tool_name, "tool_name", &mut problems);
        require_non_empty(&self.tool_version, "tool_version", &mut problems);
        if self.commit.len() != 40 || !self.commit.chars().all(|c| c.is_ascii_hexdigit()) {
            problems.push(format!("commit must be a 40-hex SHA (got '{}')", self.commit));
        }
        invalid(Self::NAME, problems)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LayoutFile {
    pub run_pk: i64,
    pub file_id: String,
    pub relative_path: String,
    pub directory_id: String,
    pub filename: String,
    pub extension: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
    pub size_bytes: Option<i64>,
    pub line_count: Option<i64>,
    pub is_binary: Option<bool>,
}

impl Entity for LayoutFile {
    const NAME: &'static str = "LayoutFile";

    fn validate(&self) -> Result<(), PersistenceError> {
        let mut problems = Vec::new();
        require_run_pk(self.run_pk, &mut problems);
        require_non_empty(&self.file_id, "file_id", &mut problems);
        require_non_empty(&self.directory_id, "directory_id", &mut problems);
        require_relative(&self.relative_path, &mut problems);
        require_non_negative(self.size_bytes, "size_bytes", &mut problems);
        require_non_negative(self.line_count, "line_count", &mut problems);
        invalid(Self::NAME, problems)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LayoutDirectory {
    pub run_pk: i64,
    pub directory_id: String,
    pub relative_path: String,
    pub parent_id: Option<String>,
    pub depth: i64,
    pub file_count: Option<i64>,
    pub total_size_bytes: Option<i64>,
}

impl Entity for LayoutDirectory {
    const NAME: &'static str = "LayoutDirectory";

    fn validate(&self) -> Result<(), PersistenceError> {
        let mut problems = Vec::new();
        require_run_pk(self.run_pk, &mut problems);
        require_non_empty(&self.directory_id, "directory_id", &mut problems);
        require_relative(&self.relative_path, &mut problems);
        require_non_negative(Some(self.depth), "depth", &mut problems);
        require_non_negative(self.file_count, "file_count", &mut problems);
        require_non_negative(self.total_size_bytes, "total_size_bytes", &mut problems);
        invalid(Self::NAME, problems)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SccFileMetric {
    pub run_pk: i64,
    pub file_id: String,
    pub directory_id: String,
    pub relative_path: String,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub language: Option<String>,
    pub lines_total: Option<i64>,
    pub code_lines: Option<i64>,
    pub comment_lines: Option<i64>,
    pub blank_lines: Option<i64>,
    pub bytes: Option<i64>,
    pub complexity: Option<i64>,
}

impl Entity for SccFileMetric {
    const NAME: &'static str = "SccFileMetric";

    fn validate(&self) -> Result<(), PersistenceError> {
        let mut problems = Vec::new();
        require_run_pk(self.run_pk, &mut problems);
        require_relative(&self.relative_path, &mut problems);
        for (field, value) in [
            ("lines_total", self.lines_total),
            ("code_lines", self.code_lines),
            ("comment_lines", self.comment_lines),
            ("blank_lines", self.blank_lines),
            ("bytes", self.bytes),
            ("complexity", self.complexity),
        ] {
            require_non_negative(value, field, &mut problems);
        }
        invalid(Self::NAME, problems)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LizardFileMetric {
    pub run_pk: i64,
    pub file_id: String,
    pub relative_path: String,
    pub language: Option<String>,
    pub nloc: Option<i64>,
    pub function_count: Option<i64>,
    pub total_ccn: Option<i64>,
    pub avg_ccn: Option<f64>,
    pub max_ccn: Option<i64>,
}

impl Entity for LizardFileMetric {
    const NAME: &'static str = "LizardFileMetric";

    fn validate(&self) -> Result<(), PersistenceError> {
        let mut problems = Vec::new();
        require_run_pk(self.run_pk, &mut problems);
        require_relative(&self.relative_path, &mut problems);
        require_non_negative(self.nloc, "nloc", &mut problems);
        require_non_negative(self.function_count, "function_count", &mut problems);
        require_non_negative(self.total_ccn, "total_ccn", &mut problems);
        require_non_negative(self.max_ccn, "max_ccn", &mut problems);
        if let Some(avg) = self.avg_ccn {
            if avg < 0.0 {
                problems.push(format!("avg_ccn must be >= 0 (got {})", avg));
            }
        }
        invalid(Self::NAME, problems)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LizardFunctionMetric {
    pub run_pk: i64,
    pub file_id: String,
    pub function_name: String,
    pub long_name: Option<String>,
    pub ccn: Option<i64>,
    pub nloc: Option<i64>,
    pub params: Option<i64>,
    pub token_count: Option<i64>,
    pub line_start: i64,
    pub line_end: i64,
}

impl Entity for LizardFunctionMetric {
    const NAME: &'static str = "LizardFunctionMetric";

    fn validate(&self) -> Result<(), PersistenceError> {
        let mut problems = Vec::new();
        require_run_pk(self.run_pk, &mut problems);
        require_non_empty(&self.function_name, "function_name", &mut problems);
        require_non_negative(self.ccn, "ccn", &mut problems);
        require_non_negative(self.nloc, "nloc", &mut problems);
        problems.extend(check_line_range(
            self.line_start,
            self.line_end,
            &self.function_name,
        ));
        invalid(Self::NAME, problems)
    }
}

/// Field names of an entity, read from its serialized default value.
pub fn entity_fields<E: Entity>() -> Vec<String> {
    match serde_json::to_value(E::default()) {
        Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}
