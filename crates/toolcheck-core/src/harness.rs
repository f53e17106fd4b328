//! Live adapter run against a throwaway database.
//!
//! The harness builds an in-memory SQLite database from the project's
//! canonical schema, seeds whatever layout rows the adapter will look up,
//! and pushes a fixture payload through `ToolAdapter::persist`. Any error
//! along the way fails `adapter.integration`.

use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolcheck_sot::validation::parse_iso8601;
use toolcheck_sot::{
    AdapterDeps, AdapterError, LayoutDirectory, LayoutFile, LayoutRepository, PersistenceError,
    ToolRun, ToolRunRepository, LAYOUT_TOOL_NAMES,
};

use crate::introspect::{AdapterIntrospector, ResolveError};
use crate::model::{CheckResult, Severity};
use crate::validators::ToolContext;

const DEFAULT_FILE_BYTES: i64 = 100;
const DEFAULT_FILE_LINES: i64 = 10;
const ROOT_DIRECTORY_ID: &str = "d-root";

/// Errors that can occur during an integration run.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to read schema {path}: {source}")]
    SchemaRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid fixture {path}: {reason}")]
    Fixture { path: String, reason: String },

    #[error("Invalid fixture metadata: {0}")]
    Metadata(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

pub struct AdapterIntegrationHarness<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> AdapterIntegrationHarness<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    /// Fixture locations in lookup order.
    pub fn fixture_candidates(&self) -> Vec<PathBuf> {
        let tool = &self.ctx.tool_name;
        let fixtures = self.ctx.project_path(&self.ctx.rules.common().sot_layout.fixtures_dir);
        let short = tool.replace("-scanner", "").replace("-analyzers", "");
        let mut candidates: Vec<PathBuf> = [tool.replace('-', "_"), tool.clone(), short]
            .iter()
            .map(|base| fixtures.join(format!("{}_output.json", base)))
            .collect();
        candidates.push(self.ctx.path("evaluation/ground-truth/synthetic.json"));
        candidates
    }

    /// `adapter.integration`
    pub fn run(&self) -> CheckResult {
        const ID: &str = "adapter.integration";
        if self.ctx.rules.adapter_for(&self.ctx.tool_name).is_none() {
            return CheckResult::fail(ID, Severity::High, "No adapter rule defined");
        }

        let candidates = self.fixture_candidates();
        let Some(fixture) = candidates.iter().find(|p| p.is_file()) else {
            return CheckResult::fail(ID, Severity::High, "No fixture file found for integration test")
                .with_evidence(candidates.iter().map(|p| p.display().to_string()));
        };

        match self.persist_fixture(fixture) {
            Ok(run_pk) => {
                tracing::debug!(tool = %self.ctx.tool_name, run_pk, "Fixture persisted");
                let name = fixture
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                CheckResult::pass(ID, Severity::High, "Adapter successfully persisted fixture data")
                    .with_evidence([format!("Fixture: {}", name)])
            }
            Err(e) => {
                tracing::warn!(tool = %self.ctx.tool_name, error = %e, "Adapter integration failed");
                CheckResult::fail(ID, Severity::High, format!("Adapter failed to persist fixture: {}", e))
                    .with_evidence([e.to_string()])
            }
        }
    }

    fn persist_fixture(&self, fixture: &Path) -> Result<i64, HarnessError> {
        let schema_path = self.ctx.project_path(&self.ctx.rules.common().sot_layout.schema_path);
        let schema = fs::read_to_string(&schema_path).map_err(|source| HarnessError::SchemaRead {
            path: schema_path.display().to_string(),
            source,
        })?;
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&schema)?;

        let fixture_err = |reason: String| HarnessError::Fixture {
            path: fixture.display().to_string(),
            reason,
        };
        let text = fs::read_to_string(fixture).map_err(|e| fixture_err(e.to_string()))?;
        let payload: Value = serde_json::from_str(&text).map_err(|e| fixture_err(e.to_string()))?;

        let registration = AdapterIntrospector::new(self.ctx).locate()?;

        if !LAYOUT_TOOL_NAMES.contains(&self.ctx.tool_name.as_str()) {
            seed_layout(&conn, &payload)?;
        }

        let deps = AdapterDeps::new(&conn, &self.ctx.tool_name, &self.ctx.project_root);
        let adapter = (registration.factory)(deps)?;
        Ok(adapter.persist(&payload)?)
    }
}

/// A file the seeded layout run must know about.
struct SeedFile<'v> {
    path: String,
    record: Option<&'v Map<String, Value>>,
}

impl SeedFile<'_> {
    fn str(&self, field: &str) -> Option<&str> {
        self.record?.get(field)?.as_str()
    }

    fn int(&self, fields: &[&str]) -> Option<i64> {
        let record = self.record?;
        fields.iter().find_map(|f| record.get(*f).and_then(Value::as_i64))
    }
}

/// Files referenced by the payload: `data.files` as a list or a path-keyed
/// map, else the distinct `file_path`s of `data.findings`.
fn seed_files(data: &Value) -> Vec<SeedFile<'_>> {
    let from_files: Vec<SeedFile<'_>> = match data.get("files") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(|record| SeedFile {
                path: record.get("path").and_then(Value::as_str).unwrap_or_default().to_string(),
                record: Some(record),
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| {
                let record = value.as_object();
                let path = record
                    .and_then(|r| r.get("path"))
                    .and_then(Value::as_str)
                    .unwrap_or(key.as_str());
                SeedFile {
                    path: path.to_string(),
                    record,
                }
            })
            .collect(),
        _ => Vec::new(),
    };
    if !from_files.is_empty() {
        return from_files;
    }

    let mut seen = HashSet::new();
    data.get("findings")
        .and_then(Value::as_array)
        .map(|findings| {
            findings
                .iter()
                .filter_map(|f| f.get("file_path").and_then(Value::as_str))
                .filter(|p| !p.is_empty() && seen.insert(p.to_string()))
                .map(|p| SeedFile {
                    path: p.to_string(),
                    record: None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Record a synthetic layout run so the adapter's file lookups resolve.
fn seed_layout(conn: &Connection, payload: &Value) -> Result<i64, HarnessError> {
    let metadata = payload.get("metadata").cloned().unwrap_or(Value::Null);
    let field = |name: &str| -> Result<String, HarnessError> {
        metadata
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarnessError::Metadata(format!("metadata.{} missing", name)))
    };

    let raw_ts = field("timestamp")?;
    let timestamp = parse_iso8601(&raw_ts)
        .ok_or_else(|| HarnessError::Metadata(format!("metadata.timestamp '{}' is not ISO-8601", raw_ts)))?;

    let run_id = field("run_id")?;
    let run_pk = ToolRunRepository::new(conn).insert(&ToolRun {
        collection_run_id: run_id.clone(),
        repo_id: field("repo_id")?,
        run_id,
        tool_name: "layout-scanner".to_string(),
        tool_version: "1.0.0".to_string(),
        schema_version: "1.0.0".to_string(),
        branch: field("branch")?,
        commit: field("commit")?,
        timestamp,
    })?;

    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    let files: Vec<LayoutFile> = seed_files(&data)
        .iter()
        .enumerate()
        .map(|(idx, file)| {
            let filename = file
                .str("filename")
                .map(str::to_string)
                .unwrap_or_else(|| file.path.rsplit('/').next().unwrap_or_default().to_string());
            let extension = file.path.rsplit_once('.').map(|(_, ext)| format!(".{}", ext));
            LayoutFile {
                run_pk,
                file_id: format!("f-{:012}", idx),
                relative_path: file.path.clone(),
                directory_id: format!("d-{:012}", idx),
                filename,
                extension,
                language: Some(file.str("language").unwrap_or("unknown").to_string()),
                category: Some(file.str("classification").unwrap_or("source").to_string()),
                size_bytes: Some(file.int(&["bytes"]).unwrap_or(DEFAULT_FILE_BYTES)),
                line_count: Some(file.int(&["lines", "lines_total"]).unwrap_or(DEFAULT_FILE_LINES)),
                is_binary: Some(
                    file.record
                        .and_then(|r| r.get("is_binary"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                ),
            }
        })
        .collect();

    let layout = LayoutRepository::new(conn);
    if !files.is_empty() {
        layout.insert_files(&files)?;
    }
    layout.insert_directories(&[LayoutDirectory {
        run_pk,
        directory_id: ROOT_DIRECTORY_ID.to_string(),
        relative_path: ".".to_string(),
        parent_id: None,
        depth: 0,
        file_count: Some(files.len() as i64),
        total_size_bytes: Some(files.iter().filter_map(|f| f.size_bytes).sum()),
    }])?;

    tracing::debug!(run_pk, files = files.len(), "Seeded layout run");
    Ok(run_pk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RulesRegistry;
    use serde_json::json;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"{
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["metadata", "data"]
    }"#;

    /// Project with the canonical schema, bundled fixtures and permissive
    /// output schemas for every bundled tool.
    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let persistence = dir.path().join("src/sot-engine/persistence");
        fs::create_dir_all(persistence.join("fixtures")).unwrap();
        fs::write(persistence.join("schema.sql"), toolcheck_sot::CANONICAL_SCHEMA_SQL).unwrap();
        for (name, fixture) in [
            ("layout", include_str!("../../toolcheck-sot/fixtures/layout_output.json")),
            ("scc", include_str!("../../toolcheck-sot/fixtures/scc_output.json")),
            ("lizard", include_str!("../../toolcheck-sot/fixtures/lizard_output.json")),
        ] {
            fs::write(persistence.join(format!("fixtures/{}_output.json", name)), fixture).unwrap();
        }
        for tool in ["layout-scanner", "scc", "lizard"] {
            let schemas = dir.path().join("src/tools").join(tool).join("schemas");
            fs::create_dir_all(&schemas).unwrap();
            fs::write(schemas.join("output.schema.json"), SCHEMA).unwrap();
        }
        dir
    }

    #[test]
    fn test_bundled_fixtures_persist() {
        let dir = project();
        let rules = RulesRegistry::embedded().unwrap();
        for tool in ["layout-scanner", "scc", "lizard"] {
            let ctx = ToolContext::new(dir.path().join("src/tools").join(tool), &rules);
            let check = AdapterIntegrationHarness::new(&ctx).run();
            assert!(check.passed(), "{}: {} {:?}", tool, check.message, check.evidence);
        }
    }

    #[test]
    fn test_fresh_database_per_run() {
        let dir = project();
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(dir.path().join("src/tools/scc"), &rules);
        let harness = AdapterIntegrationHarness::new(&ctx);
        let first = harness.run();
        let second = harness.run();
        assert!(first.passed());
        assert_eq!(first.status, second.status);
        assert_eq!(first.evidence, vec!["Fixture: scc_output.json"]);
    }

    #[test]
    fn test_fixture_candidates_order() {
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new("/p/src/tools/layout-scanner", &rules);
        let names: Vec<String> = AdapterIntegrationHarness::new(&ctx)
            .fixture_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "/p/src/sot-engine/persistence/fixtures/layout_scanner_output.json",
                "/p/src/sot-engine/persistence/fixtures/layout-scanner_output.json",
                "/p/src/sot-engine/persistence/fixtures/layout_output.json",
                "/p/src/tools/layout-scanner/evaluation/ground-truth/synthetic.json",
            ]
        );
    }

    #[test]
    fn test_ground_truth_fallback() {
        let dir = project();
        fs::remove_file(dir.path().join("src/sot-engine/persistence/fixtures/scc_output.json")).unwrap();
        let root = dir.path().join("src/tools/scc");
        fs::create_dir_all(root.join("evaluation/ground-truth")).unwrap();
        fs::write(
            root.join("evaluation/ground-truth/synthetic.json"),
            include_str!("../../toolcheck-sot/fixtures/scc_output.json"),
        )
        .unwrap();

        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = AdapterIntegrationHarness::new(&ctx).run();
        assert!(check.passed(), "{:?}", check.evidence);
        assert_eq!(check.evidence, vec!["Fixture: synthetic.json"]);
    }

    #[test]
    fn test_no_fixture_lists_candidates() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src/tools/lizard");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = AdapterIntegrationHarness::new(&ctx).run();
        assert_eq!(check.message, "No fixture file found for integration test");
        assert_eq!(check.evidence.len(), 4);
    }

    #[test]
    fn test_adapter_error_reported() {
        let dir = project();
        let fixture = dir.path().join("src/sot-engine/persistence/fixtures/scc_output.json");
        let mut payload: Value = serde_json::from_str(&fs::read_to_string(&fixture).unwrap()).unwrap();
        payload["data"]["files"][0]["path"] = json!("/abs/src/app.py");
        fs::write(&fixture, payload.to_string()).unwrap();

        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(dir.path().join("src/tools/scc"), &rules);
        let check = AdapterIntegrationHarness::new(&ctx).run();
        assert!(check.failed());
        assert!(check.message.starts_with("Adapter failed to persist fixture:"));
        assert_eq!(check.evidence.len(), 1);
    }

    #[test]
    fn test_offsetless_timestamp_persists() {
        let dir = project();
        let fixture = dir.path().join("src/sot-engine/persistence/fixtures/scc_output.json");
        let mut payload: Value = serde_json::from_str(&fs::read_to_string(&fixture).unwrap()).unwrap();
        payload["metadata"]["timestamp"] = json!("2026-01-15T10:31:00");
        fs::write(&fixture, payload.to_string()).unwrap();

        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(dir.path().join("src/tools/scc"), &rules);
        let check = AdapterIntegrationHarness::new(&ctx).run();
        assert!(check.passed(), "{} {:?}", check.message, check.evidence);
    }

    #[test]
    fn test_seed_layout_rejects_bad_timestamp() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(toolcheck_sot::CANONICAL_SCHEMA_SQL).unwrap();
        let payload = json!({
            "metadata": {
                "run_id": "r1", "repo_id": "repo", "branch": "main",
                "commit": "0123456789abcdef0123456789abcdef01234567",
                "timestamp": "15/01/2026"
            },
            "data": {"findings": [{"file_path": "src/a.py"}]}
        });
        let err = seed_layout(&conn, &payload).unwrap_err();
        assert!(err.to_string().contains("metadata.timestamp '15/01/2026' is not ISO-8601"));
    }

    #[test]
    fn test_missing_schema_sql_is_setup_error() {
        let dir = project();
        fs::remove_file(dir.path().join("src/sot-engine/persistence/schema.sql")).unwrap();
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(dir.path().join("src/tools/lizard"), &rules);
        let check = AdapterIntegrationHarness::new(&ctx).run();
        assert!(check.failed());
        assert!(check.evidence[0].starts_with("Failed to read schema"));
    }

    #[test]
    fn test_seed_files_from_map_and_findings() {
        let data = json!({"files": {"a/b.py": {"language": "Python"}, "c.rs": {"path": "src/c.rs"}}});
        let paths: Vec<String> = seed_files(&data).into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["a/b.py", "src/c.rs"]);

        let data = json!({"findings": [
            {"file_path": "x.py"}, {"file_path": "x.py"}, {"file_path": ""}, {"file_path": "y.py"}
        ]});
        let paths: Vec<String> = seed_files(&data).into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["x.py", "y.py"]);
    }

    #[test]
    fn test_seed_layout_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(toolcheck_sot::CANONICAL_SCHEMA_SQL).unwrap();
        let payload = json!({
            "metadata": {
                "run_id": "r1", "repo_id": "repo", "branch": "main",
                "commit": "0123456789abcdef0123456789abcdef01234567",
                "timestamp": "2026-01-15T10:31:00Z"
            },
            "data": {"findings": [{"file_path": "src/a.py"}, {"file_path": "README"}]}
        });
        let run_pk = seed_layout(&conn, &payload).unwrap();

        let (file_id, dir_id) = LayoutRepository::new(&conn).get_file_record(run_pk, "README").unwrap();
        assert_eq!(file_id, "f-000000000001");
        assert_eq!(dir_id, "d-000000000001");
        let (count, bytes): (i64, i64) = conn
            .query_row(
                "SELECT file_count, total_size_bytes FROM lz_layout_directories WHERE directory_id = 'd-root'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((count, bytes), (2, 200));
    }
}
