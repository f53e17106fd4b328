//! Output schema checks: the schema document itself, its agreement with a
//! live output, and instance validation.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{display_value, load_json, ToolContext};
use crate::model::{CheckResult, Severity};

pub const SCHEMA_PATH: &str = "schemas/output.schema.json";
pub const SCHEMA_DRAFT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Metadata fields every output schema must require.
pub const REQUIRED_METADATA_FIELDS: [&str; 8] = [
    "tool_name",
    "tool_version",
    "run_id",
    "repo_id",
    "branch",
    "commit",
    "timestamp",
    "schema_version",
];

const VENV_VALIDATE: &str = "import json, jsonschema, sys; \
schema=json.load(open(sys.argv[1])); \
data=json.load(open(sys.argv[2])); \
jsonschema.validate(data, schema)";

/// Allowed `metadata.schema_version` values, from `const` or `enum`.
pub fn extract_schema_versions(schema: &Value) -> Option<Vec<String>> {
    let spec = schema.pointer("/properties/metadata/properties/schema_version")?;
    let mut versions: Vec<String> = if let Some(value) = spec.get("const") {
        vec![display_value(value)]
    } else {
        spec.get("enum")?.as_array()?.iter().map(display_value).collect()
    };
    versions.sort();
    versions.dedup();
    (!versions.is_empty()).then_some(versions)
}

/// Validate inside the tool's own environment.
///
/// The returned error is the interpreter's combined output.
pub fn validate_with_venv(venv: &Path, schema_path: &Path, output_path: &Path) -> Result<(), String> {
    let python = venv.join("bin").join("python");
    if !python.exists() {
        return Err(format!("Venv python not found: {}", python.display()));
    }
    let output = Command::new(&python)
        .arg("-c")
        .arg(VENV_VALIDATE)
        .arg(schema_path)
        .arg(output_path)
        .output()
        .map_err(|e| format!("Failed to run {}: {}", python.display(), e))?;
    if output.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(combined.trim().to_string())
}

pub struct SchemaContractValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> SchemaContractValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    fn schema_path(&self) -> PathBuf {
        self.ctx.path(SCHEMA_PATH)
    }

    /// `schema.valid_json` on failure, otherwise the `schema.draft` verdict.
    pub fn valid_json_and_draft(&self) -> CheckResult {
        let path = self.schema_path();
        if !path.exists() {
            return CheckResult::fail("schema.valid_json", Severity::Medium, "Schema file missing")
                .with_evidence([SCHEMA_PATH]);
        }
        let schema = match load_json(&path) {
            Ok(v) => v,
            Err(e) => {
                return CheckResult::fail("schema.valid_json", Severity::Medium, "Schema is invalid JSON")
                    .with_evidence([e])
            }
        };
        match schema.get("$schema").and_then(Value::as_str) {
            Some(SCHEMA_DRAFT) => CheckResult::pass("schema.draft", Severity::Medium, "Schema draft is 2020-12"),
            other => CheckResult::fail("schema.draft", Severity::Medium, "Schema draft is not 2020-12")
                .with_evidence([other.unwrap_or_default()]),
        }
    }

    /// `schema.contract`
    pub fn contract(&self) -> CheckResult {
        const ID: &str = "schema.contract";
        let schema = match load_json(&self.schema_path()) {
            Ok(v) => v,
            Err(e) => return CheckResult::fail(ID, Severity::High, "Schema is invalid JSON").with_evidence([e]),
        };

        let listed = |value: Option<&Value>, field: &str| {
            value
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(field)))
        };
        let top = schema.get("required");
        let metadata = schema.pointer("/properties/metadata/required");

        let mut missing: Vec<String> = ["metadata", "data"]
            .into_iter()
            .filter(|f| !listed(top, f))
            .map(str::to_string)
            .collect();
        missing.extend(
            REQUIRED_METADATA_FIELDS
                .iter()
                .filter(|f| !listed(metadata, f))
                .map(|f| format!("metadata.{}", f)),
        );

        if missing.is_empty() {
            CheckResult::pass(ID, Severity::High, "Schema requires metadata and data fields")
        } else {
            CheckResult::fail(ID, Severity::High, "Schema missing required fields").with_evidence(missing)
        }
    }

    /// `schema.version_alignment` against a loaded output.
    pub fn version_alignment(&self, output: &Value) -> CheckResult {
        const ID: &str = "schema.version_alignment";
        let schema = match load_json(&self.schema_path()) {
            Ok(v) => v,
            Err(e) => return CheckResult::fail(ID, Severity::High, "Schema is invalid JSON").with_evidence([e]),
        };
        let Some(expected) = extract_schema_versions(&schema) else {
            return CheckResult::fail(ID, Severity::Medium, "Schema does not constrain metadata.schema_version");
        };
        let actual = output
            .pointer("/metadata/schema_version")
            .map(display_value)
            .unwrap_or_else(|| "null".to_string());

        if expected.contains(&actual) {
            CheckResult::pass(ID, Severity::Medium, "Output schema_version matches schema constraint")
                .with_evidence([actual])
        } else {
            let quoted: Vec<String> = expected.iter().map(|v| format!("'{}'", v)).collect();
            CheckResult::fail(ID, Severity::High, "Output schema_version does not match schema constraint")
                .with_evidence([format!("expected=[{}]", quoted.join(", ")), format!("actual={}", actual)])
        }
    }

    /// `output.schema_validate`: in-process first, the venv interpreter
    /// only when this schema cannot be compiled here.
    pub fn validate_instance(&self, output_path: &Path, venv: Option<&Path>) -> CheckResult {
        const ID: &str = "output.schema_validate";
        let schema_path = self.schema_path();
        let schema = match load_json(&schema_path) {
            Ok(v) => v,
            Err(e) => return CheckResult::fail(ID, Severity::Critical, "Schema is invalid JSON").with_evidence([e]),
        };
        let output = match load_json(output_path) {
            Ok(v) => v,
            Err(e) => return CheckResult::fail(ID, Severity::Critical, "Output is invalid JSON").with_evidence([e]),
        };

        let validator = match jsonschema::options().build(&schema) {
            Ok(v) => v,
            Err(e) => {
                let Some(venv) = venv else {
                    return CheckResult::fail(ID, Severity::Critical, "No validator available for schema")
                        .with_evidence([format!("Failed to compile schema: {}", e)]);
                };
                tracing::debug!(tool = %self.ctx.tool_name, error = %e, "Falling back to venv schema validation");
                return match validate_with_venv(venv, &schema_path, output_path) {
                    Ok(()) => CheckResult::pass(ID, Severity::Critical, "Output validates against schema (venv)"),
                    Err(e) => CheckResult::fail(ID, Severity::Critical, "Schema validation failed in venv")
                        .with_evidence([e]),
                };
            }
        };

        let errors: Vec<String> = validator
            .iter_errors(&output)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        if errors.is_empty() {
            CheckResult::pass(ID, Severity::Critical, "Output validates against schema")
        } else {
            CheckResult::fail(ID, Severity::Critical, "Output does not validate against schema").with_evidence(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RulesRegistry;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn schema() -> Value {
        json!({
            "$schema": SCHEMA_DRAFT,
            "type": "object",
            "required": ["metadata", "data"],
            "properties": {
                "metadata": {
                    "type": "object",
                    "required": REQUIRED_METADATA_FIELDS,
                    "properties": {
                        "schema_version": {"const": "1.0.0"},
                        "commit": {"type": "string", "pattern": "^[0-9a-f]{40}$"}
                    }
                },
                "data": {"type": "object"}
            }
        })
    }

    fn package(schema: Option<&Value>) -> (TempDir, RulesRegistry) {
        let dir = TempDir::new().unwrap();
        if let Some(schema) = schema {
            fs::create_dir_all(dir.path().join("schemas")).unwrap();
            fs::write(dir.path().join(SCHEMA_PATH), schema.to_string()).unwrap();
        }
        (dir, RulesRegistry::embedded().unwrap())
    }

    #[test]
    fn test_extract_schema_versions() {
        assert_eq!(extract_schema_versions(&schema()), Some(vec!["1.0.0".to_string()]));
        let with_enum = json!({"properties": {"metadata": {"properties": {"schema_version": {"enum": ["2.0.0", "1.0.0"]}}}}});
        assert_eq!(
            extract_schema_versions(&with_enum),
            Some(vec!["1.0.0".to_string(), "2.0.0".to_string()])
        );
        assert_eq!(extract_schema_versions(&json!({})), None);
    }

    #[test]
    fn test_conformant_schema_passes() {
        let s = schema();
        let (dir, rules) = package(Some(&s));
        let ctx = ToolContext::new(dir.path(), &rules);
        let v = SchemaContractValidator::new(&ctx);
        assert_eq!(v.valid_json_and_draft().check_id, "schema.draft");
        assert!(v.valid_json_and_draft().passed());
        assert!(v.contract().passed());
    }

    #[test]
    fn test_missing_schema_file() {
        let (dir, rules) = package(None);
        let ctx = ToolContext::new(dir.path(), &rules);
        let check = SchemaContractValidator::new(&ctx).valid_json_and_draft();
        assert_eq!(check.check_id, "schema.valid_json");
        assert_eq!(check.evidence, vec![SCHEMA_PATH]);
    }

    #[test]
    fn test_contract_lists_each_missing_field() {
        let s = json!({"required": ["data"], "properties": {"metadata": {"required": ["tool_name", "commit"]}}});
        let (dir, rules) = package(Some(&s));
        let ctx = ToolContext::new(dir.path(), &rules);
        let check = SchemaContractValidator::new(&ctx).contract();
        assert!(check.failed());
        assert_eq!(check.evidence.len(), 7);
        assert_eq!(check.evidence[0], "metadata");
        assert!(check.evidence.contains(&"metadata.schema_version".to_string()));
        assert!(!check.evidence.contains(&"metadata.commit".to_string()));
    }

    #[test]
    fn test_version_alignment() {
        let s = schema();
        let (dir, rules) = package(Some(&s));
        let ctx = ToolContext::new(dir.path(), &rules);
        let v = SchemaContractValidator::new(&ctx);
        assert!(v.version_alignment(&json!({"metadata": {"schema_version": "1.0.0"}})).passed());

        let check = v.version_alignment(&json!({"metadata": {"schema_version": "2.0.0"}}));
        assert_eq!(check.severity, Severity::High);
        assert_eq!(check.evidence, vec!["expected=['1.0.0']", "actual=2.0.0"]);
    }

    #[test]
    fn test_unconstrained_version_is_medium() {
        let s = json!({"$schema": SCHEMA_DRAFT});
        let (dir, rules) = package(Some(&s));
        let ctx = ToolContext::new(dir.path(), &rules);
        let check = SchemaContractValidator::new(&ctx).version_alignment(&json!({}));
        assert!(check.failed());
        assert_eq!(check.severity, Severity::Medium);
    }

    #[test]
    fn test_validate_instance() {
        let s = schema();
        let (dir, rules) = package(Some(&s));
        let ctx = ToolContext::new(dir.path(), &rules);
        let v = SchemaContractValidator::new(&ctx);

        let output = dir.path().join("output.json");
        fs::write(&output, json!({"metadata": {"commit": "abc"}, "data": {}}).to_string()).unwrap();
        let check = v.validate_instance(&output, None);
        assert!(check.failed());
        assert_eq!(check.severity, Severity::Critical);
        assert!(!check.evidence.is_empty());

        fs::write(&output, "{not json").unwrap();
        assert_eq!(v.validate_instance(&output, None).message, "Output is invalid JSON");
    }

    #[test]
    fn test_venv_without_python() {
        let dir = TempDir::new().unwrap();
        let err = validate_with_venv(dir.path(), Path::new("s.json"), Path::new("o.json")).unwrap_err();
        assert!(err.starts_with("Venv python not found"));
    }
}
