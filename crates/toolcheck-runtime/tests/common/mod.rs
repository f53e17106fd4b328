//! Throwaway project trees holding a fully conformant `scc` package.

#![allow(dead_code)]

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SCC_OUTPUT: &str = include_str!("../../../toolcheck-sot/fixtures/scc_output.json");

const MAKEFILE: &str = "include ../Makefile.common

.PHONY: setup analyze evaluate evaluate-llm test clean

setup:
\t@echo setup
analyze:
\t$(PYTHON) scripts/analyze.py --repo $(REPO_PATH) --output $(OUTPUT_DIR)/output.json
evaluate:
\t$(PYTHON) scripts/evaluate.py
evaluate-llm:
\t$(PYTHON) evaluation/llm/orchestrator.py
test:
\tpytest tests
clean:
\trm -rf outputs
";

const BLUEPRINT: &str = "# scc Blueprint

## Executive Summary
Line counts per file.

## Architecture
## Implementation Plan
## Configuration
## Performance
## Evaluation
## Risk Register
";

const EVAL_STRATEGY: &str = "# scc Evaluation Strategy

## Philosophy
## Dimensions
## Scoring
## Decision Thresholds
## Ground Truth

## Rollup Validation

Rollups:
- directory_direct_distributions
- directory_recursive_distributions

Tests:
- src/sot-engine/dbt/tests/test_rollup_scc_direct_vs_recursive.sql
";

/// A project root with `src/tools/scc` and the shared persistence layout.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn tool_root(&self) -> PathBuf {
        self.root().join("src/tools/scc")
    }

    pub fn tools_root(&self) -> PathBuf {
        self.root().join("src/tools")
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn write_tool(&self, relative: &str, contents: &str) {
        self.write(&format!("src/tools/scc/{}", relative), contents);
    }

    pub fn mkdir_tool(&self, relative: &str) {
        fs::create_dir_all(self.tool_root().join(relative)).unwrap();
    }

    pub fn remove_tool(&self, relative: &str) {
        let path = self.tool_root().join(relative);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
    }
}

fn output_schema() -> String {
    let schema = json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["metadata", "data"],
        "properties": {
            "metadata": {
                "type": "object",
                "required": [
                    "tool_name", "tool_version", "run_id", "repo_id",
                    "branch", "commit", "timestamp", "schema_version"
                ],
                "properties": {
                    "commit": {"type": "string", "pattern": "^[0-9a-fA-F]{40}$"},
                    "schema_version": {"const": "1.0.0"}
                }
            },
            "data": {"type": "object"}
        }
    });
    serde_json::to_string_pretty(&schema).unwrap()
}

/// Build a project whose `scc` package passes every check.
pub fn conformant_project() -> Project {
    let project = Project {
        dir: TempDir::new().unwrap(),
    };

    // Shared persistence and downstream models
    project.write("src/sot-engine/persistence/schema.sql", toolcheck_sot::CANONICAL_SCHEMA_SQL);
    project.write("src/sot-engine/persistence/fixtures/scc_output.json", SCC_OUTPUT);
    project.write(
        "src/sot-engine/dbt/models/staging/stg_lz_scc_file_metrics.sql",
        "select * from lz_scc_file_metrics",
    );
    for rollup in ["directory_direct_distributions", "directory_recursive_distributions"] {
        project.write(
            &format!("src/sot-engine/dbt/models/marts/rollup_scc_{}.sql", rollup),
            "select * from {{ ref('stg_lz_scc_file_metrics') }}",
        );
    }
    project.write(
        "src/sot-engine/dbt/tests/test_rollup_scc_direct_vs_recursive.sql",
        "select 1 where false",
    );

    // Package layout
    project.write_tool("Makefile", MAKEFILE);
    project.write_tool("README.md", "# scc\n");
    project.write_tool("BLUEPRINT.md", BLUEPRINT);
    project.write_tool("EVAL_STRATEGY.md", EVAL_STRATEGY);
    project.write_tool("requirements.txt", "jsonschema\n");
    project.write_tool("scripts/analyze.py", "print('analyze')\n");
    project.write_tool("scripts/evaluate.py", "print('evaluate')\n");
    for module in ["accuracy.py", "coverage.py", "performance.py"] {
        project.write_tool(&format!("scripts/checks/{}", module), "");
    }
    project.write_tool("schemas/output.schema.json", &output_schema());
    project.mkdir_tool("eval-repos/synthetic");
    project.mkdir_tool("eval-repos/real");
    project.write_tool("evaluation/ground-truth/synthetic.json", "{\"files\": 2}");
    project.write_tool("evaluation/llm/orchestrator.py", "");
    for judge in ["__init__.py", "base.py", "accuracy.py", "actionability.py", "fit.py", "clarity.py"] {
        project.write_tool(&format!("evaluation/llm/judges/{}", judge), "");
    }
    for prompt in ["code_quality.md", "integration_fit.md", "documentation.md", "edge_cases.md"] {
        project.write_tool(&format!("evaluation/llm/prompts/{}", prompt), "Rate the output.\n");
    }
    project.write_tool("evaluation/scorecard.md", "# Scorecard\n\nScore: 0.95\n");
    project.write_tool("tests/unit/test_analyze.py", "def test_ok():\n    pass\n");
    project.write_tool("tests/unit/__init__.py", "");
    project.write_tool("tests/integration/test_pipeline.py", "def test_ok():\n    pass\n");

    // Artifacts from an earlier run
    project.write_tool("evaluation/results/output.json", SCC_OUTPUT);
    project.write_tool(
        "evaluation/results/evaluation_report.json",
        &json!({
            "timestamp": "2026-01-15T11:00:00Z",
            "decision": "PASS",
            "score": 0.95,
            "checks": [{"name": "line_counts", "passed": true}],
            "summary": {"passed": 1, "failed": 0}
        })
        .to_string(),
    );
    project.write_tool(
        "evaluation/results/llm_evaluation.json",
        &json!({
            "timestamp": "2026-01-15T11:05:00Z",
            "model": "judge-large",
            "decision": "PASS",
            "score": 4.2,
            "dimensions": [{"name": "accuracy", "score": 4}],
            "programmatic_input": {
                "file": "evaluation/results/evaluation_report.json",
                "decision": "PASS",
                "score": 0.95
            }
        })
        .to_string(),
    );

    project
}
