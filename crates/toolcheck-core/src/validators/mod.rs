//! Package validators.
//!
//! Every check returns a [`CheckResult`](crate::CheckResult); validators
//! never propagate errors. An unreadable file is a failed check like any
//! other.

pub mod docs;
pub mod entity_alignment;
pub mod evaluation;
pub mod make;
pub mod model_coverage;
pub mod output_content;
pub mod schema_contract;
pub mod sql_joins;
pub mod structure;

pub use docs::DocsValidator;
pub use entity_alignment::EntityAlignmentValidator;
pub use evaluation::EvaluationArtifactValidator;
pub use make::MakefileValidator;
pub use model_coverage::ModelCoverageValidator;
pub use output_content::OutputContentValidator;
pub use schema_contract::SchemaContractValidator;
pub use structure::StructuralValidator;

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::rules::RulesRegistry;

/// The package under inspection plus the rules it is held to.
#[derive(Debug, Clone)]
pub struct ToolContext<'a> {
    pub tool_root: PathBuf,
    pub tool_name: String,
    /// Root the persistence layer and shared SQL are resolved against
    pub project_root: PathBuf,
    pub rules: &'a RulesRegistry,
}

impl<'a> ToolContext<'a> {
    /// Context for a package at `<project>/src/tools/<name>`.
    pub fn new(tool_root: impl Into<PathBuf>, rules: &'a RulesRegistry) -> Self {
        let tool_root = tool_root.into();
        let project_root = default_project_root(&tool_root);
        Self::with_project_root(tool_root, project_root, rules)
    }

    pub fn with_project_root(
        tool_root: impl Into<PathBuf>,
        project_root: impl Into<PathBuf>,
        rules: &'a RulesRegistry,
    ) -> Self {
        let tool_root = tool_root.into();
        let tool_name = tool_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            tool_root,
            tool_name,
            project_root: project_root.into(),
            rules,
        }
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.tool_root.join(relative)
    }

    pub fn project_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.project_root.join(relative)
    }
}

/// Three levels above the tool root, or its parent when shallower.
pub fn default_project_root(tool_root: &Path) -> PathBuf {
    tool_root
        .ancestors()
        .nth(3)
        .or_else(|| tool_root.parent())
        .unwrap_or(tool_root)
        .to_path_buf()
}

/// Read and parse a JSON file; the error is the message shown as evidence.
pub fn load_json(path: &Path) -> Result<Value, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

/// Sorted file names in `dir` with extension `ext`.
pub(crate) fn files_with_extension(dir: &Path, ext: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

/// Every file under `dir`, recursively, in sorted order.
pub(crate) fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for path in entries.filter_map(Result::ok).map(|e| e.path()) {
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Strings unquoted, everything else as JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Falsy in the loose sense: null, false, zero, or empty.
pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Python-style type name for a JSON value, used in evidence.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_project_root() {
        assert_eq!(
            default_project_root(Path::new("/repo/src/tools/scc")),
            PathBuf::from("/repo")
        );
        assert_eq!(default_project_root(Path::new("tools/scc")), PathBuf::from("tools"));
    }

    #[test]
    fn test_context_tool_name() {
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new("/repo/src/tools/lizard", &rules);
        assert_eq!(ctx.tool_name, "lizard");
        assert_eq!(ctx.path("Makefile"), PathBuf::from("/repo/src/tools/lizard/Makefile"));
    }
}
