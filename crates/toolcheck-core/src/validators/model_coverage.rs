//! Downstream coverage: staging and rollup models plus landing-zone tables
//! for every tool that persists through an adapter.

use regex::{Regex, RegexBuilder};
use std::fs;
use std::path::{Path, PathBuf};

use super::docs::rollup_names;
use super::ToolContext;
use crate::model::{CheckResult, Severity};

/// Tool name as used by downstream models: `layout-scanner` → `layout`,
/// `git-sizer` → `git_sizer`.
pub fn normalize_tool_name(tool: &str) -> String {
    let mut name = tool;
    for suffix in ["-scanner", "-analyzers"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped;
        }
    }
    name.replace('-', "_")
}

/// `*`-only wildcard pattern as an anchored regex.
fn wildcard(pattern: &str) -> Option<Regex> {
    let body = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", body)).ok()
}

/// Sorted file names in `dir` matching a `*` wildcard pattern.
fn glob_names(dir: &Path, pattern: &str) -> Vec<String> {
    let Some(re) = wildcard(pattern) else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| re.is_match(name))
        .collect();
    names.sort();
    names
}

pub struct ModelCoverageValidator<'a> {
    ctx: &'a ToolContext<'a>,
    dbt_name: String,
}

impl<'a> ModelCoverageValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self {
            ctx,
            dbt_name: normalize_tool_name(&ctx.tool_name),
        }
    }

    fn has_adapter(&self) -> bool {
        self.ctx.rules.adapter_for(&self.ctx.tool_name).is_some()
    }

    fn models_dir(&self) -> PathBuf {
        self.ctx.project_path(&self.ctx.rules.common().sot_layout.dbt_models_dir)
    }

    fn staging_pattern(&self) -> String {
        format!("stg_*{}*.sql", self.dbt_name)
    }

    /// Staging models, by the loose pattern first and then `stg_lz_<name>*`.
    fn staging_models(&self, staging: &Path) -> Vec<String> {
        let found = glob_names(staging, &self.staging_pattern());
        if !found.is_empty() {
            return found;
        }
        glob_names(staging, &format!("stg_lz_{}*.sql", self.dbt_name))
    }

    /// `dbt.model_coverage`
    pub fn dbt_model_coverage(&self) -> CheckResult {
        const ID: &str = "dbt.model_coverage";
        if !self.has_adapter() {
            return CheckResult::fail(ID, Severity::High, "No adapter defined for this tool");
        }

        let models = self.models_dir();
        let staging = self.staging_models(&models.join("staging"));
        let mut missing = Vec::new();
        if staging.is_empty() {
            missing.push(format!("No staging models matching {}", self.staging_pattern()));
        }

        let strategy = fs::read_to_string(self.ctx.path("EVAL_STRATEGY.md")).unwrap_or_default();
        let marts = models.join("marts");
        for rollup in rollup_names(&strategy) {
            let exact = glob_names(&marts, &format!("rollup_{}_{}.sql", self.dbt_name, rollup));
            if !exact.is_empty() {
                continue;
            }
            let loose = glob_names(&marts, &format!("rollup_{}_*.sql", self.dbt_name));
            if !loose.iter().any(|name| name.contains(&rollup)) {
                missing.push(format!("Missing rollup model for {}", rollup));
            }
        }

        if missing.is_empty() {
            CheckResult::pass(ID, Severity::High, "dbt models present for tool").with_evidence(staging)
        } else {
            CheckResult::fail(ID, Severity::High, "Missing dbt model coverage").with_evidence(missing)
        }
    }

    /// `sot.dbt_staging_model`; `None` for tools that do not persist.
    pub fn dbt_staging_model(&self) -> Option<CheckResult> {
        const ID: &str = "sot.dbt_staging_model";
        if !self.has_adapter() {
            return None;
        }
        let staging = self.models_dir().join("staging");
        if !staging.is_dir() {
            return Some(
                CheckResult::fail(ID, Severity::High, "dbt staging directory not found")
                    .with_evidence([staging.display().to_string()]),
            );
        }
        let found = self.staging_models(&staging);
        Some(if found.is_empty() {
            CheckResult::fail(ID, Severity::High, "No dbt staging models found for tool").with_evidence([format!(
                "Expected: {} in {}",
                self.staging_pattern(),
                staging.display()
            )])
        } else {
            CheckResult::pass(ID, Severity::High, "dbt staging model(s) found").with_evidence(found)
        })
    }

    /// `sot.schema_table`: `lz_<name>*` tables in the canonical schema;
    /// `None` for tools that do not persist.
    pub fn schema_table(&self) -> Option<CheckResult> {
        const ID: &str = "sot.schema_table";
        if !self.has_adapter() {
            return None;
        }
        let schema_path = self.ctx.project_path(&self.ctx.rules.common().sot_layout.schema_path);
        let Ok(schema) = fs::read_to_string(&schema_path) else {
            return Some(
                CheckResult::fail(ID, Severity::High, "schema.sql not found")
                    .with_evidence([schema_path.display().to_string()]),
            );
        };

        let tool = &self.ctx.tool_name;
        let normalized = tool.replace('-', "_").replace("_scanner", "").replace("_analyzers", "");
        let mut count = count_lz_tables(&schema, &normalized);
        if count == 0 {
            count = count_lz_tables(&schema, &tool.replace('-', "_"));
        }

        Some(if count == 0 {
            CheckResult::fail(
                ID,
                Severity::High,
                format!("No landing zone tables found for tool (expected lz_{}_*)", normalized),
            )
            .with_evidence([format!("Pattern: lz_{}_*", normalized)])
        } else {
            CheckResult::pass(ID, Severity::High, "Schema tables found for tool")
                .with_evidence([format!("Found {} table(s)", count)])
        })
    }
}

fn count_lz_tables(schema: &str, name: &str) -> usize {
    let pattern = format!(r"CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?lz_{}", regex::escape(name));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.find_iter(schema).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RulesRegistry;
    use tempfile::TempDir;

    const STRATEGY: &str = "# Strategy\n## Rollup Validation\nRollups:\n- directory_direct_distributions\n- directory_recursive_distributions\nTests:\n- src/sot-engine/dbt/tests/x.sql\n";

    fn project(tool: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src/tools").join(tool);
        fs::create_dir_all(&root).unwrap();
        (dir, root)
    }

    fn touch(path: PathBuf) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "select 1").unwrap();
    }

    #[test]
    fn test_normalize_tool_name() {
        assert_eq!(normalize_tool_name("layout-scanner"), "layout");
        assert_eq!(normalize_tool_name("roslyn-analyzers"), "roslyn");
        assert_eq!(normalize_tool_name("git-sizer"), "git_sizer");
        assert_eq!(normalize_tool_name("scc"), "scc");
    }

    #[test]
    fn test_wildcard() {
        let re = wildcard("stg_*scc*.sql").unwrap();
        assert!(re.is_match("stg_scc.sql"));
        assert!(re.is_match("stg_lz_scc_file_metrics.sql"));
        assert!(!re.is_match("stg_lizard.sql"));
        assert!(!re.is_match("stg_scc.sql.bak"));
    }

    #[test]
    fn test_model_coverage_with_rollups() {
        let (dir, root) = project("scc");
        fs::write(root.join("EVAL_STRATEGY.md"), STRATEGY).unwrap();
        let models = dir.path().join("src/sot-engine/dbt/models");
        touch(models.join("staging/stg_lz_scc_file_metrics.sql"));
        touch(models.join("marts/rollup_scc_directory_direct_distributions.sql"));

        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = ModelCoverageValidator::new(&ctx).dbt_model_coverage();
        assert!(check.failed());
        assert_eq!(
            check.evidence,
            vec!["Missing rollup model for directory_recursive_distributions"]
        );

        touch(models.join("marts/rollup_scc_v2_directory_recursive_distributions.sql"));
        let check = ModelCoverageValidator::new(&ctx).dbt_model_coverage();
        assert!(check.passed());
        assert_eq!(check.evidence, vec!["stg_lz_scc_file_metrics.sql"]);
    }

    #[test]
    fn test_model_coverage_requires_adapter() {
        let (_dir, root) = project("mystery");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let v = ModelCoverageValidator::new(&ctx);
        assert_eq!(v.dbt_model_coverage().message, "No adapter defined for this tool");
        assert!(v.dbt_staging_model().is_none());
        assert!(v.schema_table().is_none());
    }

    #[test]
    fn test_staging_model_layout_name() {
        let (dir, root) = project("layout-scanner");
        touch(dir.path().join("src/sot-engine/dbt/models/staging/stg_lz_layout_files.sql"));
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = ModelCoverageValidator::new(&ctx).dbt_staging_model().unwrap();
        assert!(check.passed());
        assert_eq!(check.evidence, vec!["stg_lz_layout_files.sql"]);
    }

    #[test]
    fn test_schema_table() {
        let (dir, root) = project("lizard");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let v = ModelCoverageValidator::new(&ctx);
        assert_eq!(v.schema_table().unwrap().message, "schema.sql not found");

        let schema = dir.path().join("src/sot-engine/persistence/schema.sql");
        fs::create_dir_all(schema.parent().unwrap()).unwrap();
        fs::write(&schema, toolcheck_sot::CANONICAL_SCHEMA_SQL).unwrap();
        let check = v.schema_table().unwrap();
        assert!(check.passed());
        assert_eq!(check.evidence, vec!["Found 2 table(s)"]);
    }
}
