//! Lizard adapter: per-file and per-function complexity metrics.

use std::collections::HashSet;

use serde_json::Value;

use super::{
    collection_run_id, records, sections, AdapterContract, AdapterDeps, AdapterError,
    BaseAdapter, ToolAdapter,
};
use crate::entities::{LizardFileMetric, LizardFunctionMetric};
use crate::repositories::LizardRepository;
use crate::validation::{
    check_line_range, check_non_negative, check_required, int_field, is_repo_relative_path,
    normalize_file_path, opt_int_field, str_field,
};
use crate::catalog::ToolRepository;

pub const CONTRACT: AdapterContract = AdapterContract {
    tool_name: "lizard",
    schema_path: "src/tools/lizard/schemas/output.schema.json",
    lz_tables: &[
        (
            "lz_lizard_file_metrics",
            &[
                ("run_pk", "BIGINT"),
                ("file_id", "VARCHAR"),
                ("relative_path", "VARCHAR"),
                ("language", "VARCHAR"),
                ("nloc", "INTEGER"),
                ("function_count", "INTEGER"),
                ("total_ccn", "INTEGER"),
                ("avg_ccn", "DOUBLE"),
                ("max_ccn", "INTEGER"),
            ],
        ),
        (
            "lz_lizard_function_metrics",
            &[
                ("run_pk", "BIGINT"),
                ("file_id", "VARCHAR"),
                ("function_name", "VARCHAR"),
                ("long_name", "VARCHAR"),
                ("ccn", "INTEGER"),
                ("nloc", "INTEGER"),
                ("params", "INTEGER"),
                ("token_count", "INTEGER"),
                ("line_start", "INTEGER"),
                ("line_end", "INTEGER"),
            ],
        ),
    ],
    quality_rules: &["paths", "ranges", "required_fields"],
    table_ddl: &[
        (
            "lz_lizard_file_metrics",
            "CREATE TABLE IF NOT EXISTS lz_lizard_file_metrics (
                run_pk BIGINT NOT NULL,
                file_id VARCHAR NOT NULL,
                relative_path VARCHAR NOT NULL,
                language VARCHAR,
                nloc INTEGER,
                function_count INTEGER,
                total_ccn INTEGER,
                avg_ccn DOUBLE,
                max_ccn INTEGER,
                PRIMARY KEY (run_pk, file_id)
            )",
        ),
        (
            "lz_lizard_function_metrics",
            "CREATE TABLE IF NOT EXISTS lz_lizard_function_metrics (
                run_pk BIGINT NOT NULL,
                file_id VARCHAR NOT NULL,
                function_name VARCHAR NOT NULL,
                long_name VARCHAR,
                ccn INTEGER,
                nloc INTEGER,
                params INTEGER,
                token_count INTEGER,
                line_start INTEGER,
                line_end INTEGER,
                PRIMARY KEY (run_pk, file_id, function_name, line_start)
            )",
        ),
    ],
};

pub struct LizardAdapter<'c> {
    base: BaseAdapter<'c>,
    repo: LizardRepository<'c>,
}

impl<'c> LizardAdapter<'c> {
    pub fn new(base: BaseAdapter<'c>, repo: LizardRepository<'c>) -> Self {
        Self { base, repo }
    }
}

pub fn create(deps: AdapterDeps<'_>) -> Result<Box<dyn ToolAdapter + '_>, AdapterError> {
    let repo = match deps.tool_repo {
        Some(ToolRepository::Lizard(repo)) => repo,
        _ => return Err(AdapterError::MissingRepository(LizardRepository::NAME)),
    };
    let base = BaseAdapter::new(&deps, &CONTRACT);
    Ok(Box::new(LizardAdapter::new(base, repo)))
}

impl ToolAdapter for LizardAdapter<'_> {
    fn base(&self) -> &BaseAdapter<'_> {
        &self.base
    }

    fn validate_quality(&self, data: &Value) -> Result<(), AdapterError> {
        let mut errors = Vec::new();

        for (i, (_, file)) in records(data.get("files")).into_iter().enumerate() {
            let ctx = format!("files[{}]", i);
            errors.extend(check_required(file, "path", &ctx));

            let path = str_field(file, "path").unwrap_or_default();
            if !path.is_empty() && !is_repo_relative_path(&normalize_file_path(path, None)) {
                errors.push(format!("{}: path is not repo-relative: {}", ctx, path));
            }

            for field in ["nloc", "function_count", "total_ccn", "max_ccn"] {
                errors.extend(check_non_negative(int_field(file, field, 0), field, &ctx));
            }
            let avg_ccn = file.get("avg_ccn").and_then(Value::as_f64).unwrap_or(0.0);
            let max_ccn = int_field(file, "max_ccn", 0) as f64;
            if avg_ccn > max_ccn {
                errors.push(format!("{}: avg_ccn {} exceeds max_ccn {}", ctx, avg_ccn, max_ccn));
            }

            for (j, (_, func)) in records(file.get("functions")).into_iter().enumerate() {
                let fctx = format!("{}.functions[{}]", ctx, j);
                errors.extend(check_required(func, "name", &fctx));
                errors.extend(check_non_negative(int_field(func, "ccn", 0), "ccn", &fctx));
                let start = int_field(func, "line_start", 0);
                let end = int_field(func, "line_end", start);
                // Functions without a start line are skipped at insert time.
                if start >= 1 {
                    errors.extend(check_line_range(start, end, &fctx));
                }
            }
        }

        self.base.raise_quality_errors(errors)
    }

    fn do_persist(&self, payload: &Value) -> Result<i64, AdapterError> {
        let (metadata, data) = sections(payload)?;
        let layout_run_pk = self.base.get_layout_run_pk(collection_run_id(metadata)?)?;
        let run_pk = self.base.create_tool_run(metadata)?;
        let repo_root = str_field(data, "root_path").map(std::path::Path::new);

        let mut seen_files = HashSet::new();
        let mut seen_functions = HashSet::new();
        let mut file_rows = Vec::new();
        let mut function_rows = Vec::new();

        for (_, file) in records(data.get("files")) {
            let raw = str_field(file, "path").unwrap_or_default();
            let relative_path = normalize_file_path(raw, repo_root);
            if !seen_files.insert(relative_path.clone()) {
                continue;
            }
            let (file_id, _) = self
                .base
                .layout_repo()
                .get_file_record(layout_run_pk, &relative_path)?;

            for func in records(file.get("functions")).into_iter().map(|(_, f)| f) {
                let line_start = int_field(func, "line_start", 0);
                if line_start < 1 {
                    tracing::debug!(path = %relative_path, "Skipping function without start line");
                    continue;
                }
                let function_name = str_field(func, "name").unwrap_or_default().to_string();
                if !seen_functions.insert((file_id.clone(), function_name.clone(), line_start)) {
                    continue;
                }
                function_rows.push(LizardFunctionMetric {
                    run_pk,
                    file_id: file_id.clone(),
                    function_name,
                    long_name: str_field(func, "long_name").map(str::to_string),
                    ccn: opt_int_field(func, "ccn"),
                    nloc: opt_int_field(func, "nloc"),
                    params: opt_int_field(func, "params"),
                    token_count: opt_int_field(func, "token_count"),
                    line_start,
                    line_end: int_field(func, "line_end", line_start),
                });
            }

            file_rows.push(LizardFileMetric {
                run_pk,
                file_id,
                relative_path,
                language: str_field(file, "language").map(str::to_string),
                nloc: opt_int_field(file, "nloc"),
                function_count: opt_int_field(file, "function_count"),
                total_ccn: opt_int_field(file, "total_ccn"),
                avg_ccn: file.get("avg_ccn").and_then(Value::as_f64),
                max_ccn: opt_int_field(file, "max_ccn"),
            });
        }

        self.repo.insert_file_metrics(&file_rows)?;
        self.repo.insert_function_metrics(&function_rows)?;
        tracing::info!(
            run_pk,
            files = file_rows.len(),
            functions = function_rows.len(),
            "Persisted lizard metrics"
        );
        Ok(run_pk)
    }
}
