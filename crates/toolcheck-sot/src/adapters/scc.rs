//! scc adapter: line counts and complexity per file.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;

use super::{
    collection_run_id, records, sections, AdapterContract, AdapterDeps, AdapterError,
    BaseAdapter, ToolAdapter,
};
use crate::catalog::ToolRepository;
use crate::entities::SccFileMetric;
use crate::repositories::SccRepository;
use crate::validation::{
    check_non_negative, check_required, int_field, is_repo_relative_path, normalize_file_path,
    opt_int_field, str_field,
};

const COUNT_FIELDS: [&str; 6] = [
    "lines_total",
    "code_lines",
    "comment_lines",
    "blank_lines",
    "bytes",
    "complexity",
];

pub const CONTRACT: AdapterContract = AdapterContract {
    tool_name: "scc",
    schema_path: "src/tools/scc/schemas/output.schema.json",
    lz_tables: &[(
        "lz_scc_file_metrics",
        &[
            ("run_pk", "BIGINT"),
            ("file_id", "VARCHAR"),
            ("directory_id", "VARCHAR"),
            ("relative_path", "VARCHAR"),
            ("filename", "VARCHAR"),
            ("extension", "VARCHAR"),
            ("language", "VARCHAR"),
            ("lines_total", "INTEGER"),
            ("code_lines", "INTEGER"),
            ("comment_lines", "INTEGER"),
            ("blank_lines", "INTEGER"),
            ("bytes", "BIGINT"),
            ("complexity", "INTEGER"),
        ],
    )],
    quality_rules: &["paths", "line_counts", "required_fields"],
    table_ddl: &[(
        "lz_scc_file_metrics",
        "CREATE TABLE IF NOT EXISTS lz_scc_file_metrics (
            run_pk BIGINT NOT NULL,
            file_id VARCHAR NOT NULL,
            directory_id VARCHAR NOT NULL,
            relative_path VARCHAR NOT NULL,
            filename VARCHAR,
            extension VARCHAR,
            language VARCHAR,
            lines_total INTEGER,
            code_lines INTEGER,
            comment_lines INTEGER,
            blank_lines INTEGER,
            bytes BIGINT,
            complexity INTEGER,
            PRIMARY KEY (run_pk, file_id)
        )",
    )],
};

pub struct SccAdapter<'c> {
    base: BaseAdapter<'c>,
    repo: SccRepository<'c>,
}

impl<'c> SccAdapter<'c> {
    pub fn new(base: BaseAdapter<'c>, repo: SccRepository<'c>) -> Self {
        Self { base, repo }
    }
}

pub fn create(deps: AdapterDeps<'_>) -> Result<Box<dyn ToolAdapter + '_>, AdapterError> {
    let repo = match deps.tool_repo {
        Some(ToolRepository::Scc(repo)) => repo,
        _ => return Err(AdapterError::MissingRepository(SccRepository::NAME)),
    };
    let base = BaseAdapter::new(&deps, &CONTRACT);
    Ok(Box::new(SccAdapter::new(base, repo)))
}

impl ToolAdapter for SccAdapter<'_> {
    fn base(&self) -> &BaseAdapter<'_> {
        &self.base
    }

    fn validate_quality(&self, data: &Value) -> Result<(), AdapterError> {
        let mut errors = Vec::new();
        for (i, (_, file)) in records(data.get("files")).into_iter().enumerate() {
            let ctx = format!("files[{}]", i);
            errors.extend(check_required(file, "path", &ctx));
            errors.extend(check_required(file, "language", &ctx));

            let path = str_field(file, "path").unwrap_or_default();
            if !path.is_empty() && !is_repo_relative_path(&normalize_file_path(path, None)) {
                errors.push(format!("{}: path is not repo-relative: {}", ctx, path));
            }

            for field in COUNT_FIELDS {
                errors.extend(check_non_negative(int_field(file, field, 0), field, &ctx));
            }
            let parts = int_field(file, "code_lines", 0)
                + int_field(file, "comment_lines", 0)
                + int_field(file, "blank_lines", 0);
            let total = int_field(file, "lines_total", parts);
            if parts > total {
                errors.push(format!(
                    "{}: code+comment+blank lines {} exceed lines_total {}",
                    ctx, parts, total
                ));
            }
        }
        self.base.raise_quality_errors(errors)
    }

    fn do_persist(&self, payload: &Value) -> Result<i64, AdapterError> {
        let (metadata, data) = sections(payload)?;
        let layout_run_pk = self.base.get_layout_run_pk(collection_run_id(metadata)?)?;
        let run_pk = self.base.create_tool_run(metadata)?;
        let repo_root = str_field(data, "root_path").map(Path::new);

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for (_, file) in records(data.get("files")) {
            let relative_path =
                normalize_file_path(str_field(file, "path").unwrap_or_default(), repo_root);
            if !seen.insert(relative_path.clone()) {
                continue;
            }
            let (file_id, directory_id) = self
                .base
                .layout_repo()
                .get_file_record(layout_run_pk, &relative_path)?;
            let filename = str_field(file, "filename")
                .map(str::to_string)
                .or_else(|| relative_path.rsplit('/').next().map(str::to_string));

            rows.push(SccFileMetric {
                run_pk,
                file_id,
                directory_id,
                filename,
                extension: str_field(file, "extension").map(str::to_string),
                language: str_field(file, "language").map(str::to_string),
                lines_total: opt_int_field(file, "lines_total"),
                code_lines: opt_int_field(file, "code_lines"),
                comment_lines: opt_int_field(file, "comment_lines"),
                blank_lines: opt_int_field(file, "blank_lines"),
                bytes: opt_int_field(file, "bytes"),
                complexity: opt_int_field(file, "complexity"),
                relative_path,
            });
        }

        self.repo.insert_file_metrics(&rows)?;
        tracing::info!(run_pk, files = rows.len(), "Persisted scc metrics");
        Ok(run_pk)
    }
}
