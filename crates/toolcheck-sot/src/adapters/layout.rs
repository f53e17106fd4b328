//! Layout adapter: the file/directory inventory other tools join against.

use std::path::Path;

use serde_json::Value;

use super::{records, sections, AdapterContract, AdapterDeps, AdapterError, BaseAdapter, ToolAdapter};
use crate::entities::{LayoutDirectory, LayoutFile};
use crate::validation::{
    check_non_negative, check_required, int_field, is_repo_relative_path, normalize_dir_path,
    normalize_file_path, opt_int_field, str_field,
};

pub const CONTRACT: AdapterContract = AdapterContract {
    tool_name: "layout-scanner",
    schema_path: "src/tools/layout-scanner/schemas/output.schema.json",
    lz_tables: &[
        (
            "lz_layout_files",
            &[
                ("run_pk", "BIGINT"),
                ("file_id", "VARCHAR"),
                ("relative_path", "VARCHAR"),
                ("directory_id", "VARCHAR"),
                ("filename", "VARCHAR"),
                ("extension", "VARCHAR"),
                ("language", "VARCHAR"),
                ("category", "VARCHAR"),
                ("size_bytes", "BIGINT"),
                ("line_count", "INTEGER"),
                ("is_binary", "BOOLEAN"),
            ],
        ),
        (
            "lz_layout_directories",
            &[
                ("run_pk", "BIGINT"),
                ("directory_id", "VARCHAR"),
                ("relative_path", "VARCHAR"),
                ("parent_id", "VARCHAR"),
                ("depth", "INTEGER"),
                ("file_count", "INTEGER"),
                ("total_size_bytes", "BIGINT"),
            ],
        ),
    ],
    quality_rules: &["paths", "required_fields", "sizes"],
    table_ddl: &[
        (
            "lz_layout_files",
            "CREATE TABLE IF NOT EXISTS lz_layout_files (
                run_pk BIGINT NOT NULL,
                file_id VARCHAR NOT NULL,
                relative_path VARCHAR NOT NULL,
                directory_id VARCHAR NOT NULL,
                filename VARCHAR NOT NULL,
                extension VARCHAR,
                language VARCHAR,
                category VARCHAR,
                size_bytes BIGINT,
                line_count INTEGER,
                is_binary BOOLEAN,
                created_at TIMESTAMP DEFAULT (CURRENT_TIMESTAMP),
                PRIMARY KEY (run_pk, file_id)
            )",
        ),
        (
            "lz_layout_directories",
            "CREATE TABLE IF NOT EXISTS lz_layout_directories (
                run_pk BIGINT NOT NULL,
                directory_id VARCHAR NOT NULL,
                relative_path VARCHAR NOT NULL,
                parent_id VARCHAR,
                depth INTEGER NOT NULL,
                file_count INTEGER,
                total_size_bytes BIGINT,
                PRIMARY KEY (run_pk, directory_id)
            )",
        ),
    ],
};

/// Root directory id used when a file carries no parent.
const ROOT_DIRECTORY_ID: &str = "d-root";

pub struct LayoutAdapter<'c> {
    base: BaseAdapter<'c>,
}

pub fn create(deps: AdapterDeps<'_>) -> Result<Box<dyn ToolAdapter + '_>, AdapterError> {
    Ok(Box::new(LayoutAdapter {
        base: BaseAdapter::new(&deps, &CONTRACT),
    }))
}

fn record_path<'v>(key: Option<&'v str>, record: &'v Value) -> Option<&'v str> {
    str_field(record, "path").or(key)
}

impl ToolAdapter for LayoutAdapter<'_> {
    fn base(&self) -> &BaseAdapter<'_> {
        &self.base
    }

    fn validate_quality(&self, data: &Value) -> Result<(), AdapterError> {
        let mut errors = Vec::new();

        for (section, size_field) in [("files", "size_bytes"), ("directories", "recursive_size_bytes")] {
            for (i, (key, record)) in records(data.get(section)).into_iter().enumerate() {
                let ctx = format!("{}[{}]", section, i);
                errors.extend(check_required(record, "id", &ctx));
                match record_path(key, record) {
                    Some(path) if section == "directories" && path == "." => {}
                    Some(path) if !is_repo_relative_path(&normalize_file_path(path, None)) => {
                        errors.push(format!("{}: path is not repo-relative: {}", ctx, path))
                    }
                    Some(_) => {}
                    None => errors.push(format!("{}: missing required field path", ctx)),
                }
                errors.extend(check_non_negative(int_field(record, size_field, 0), size_field, &ctx));
            }
        }

        self.base.raise_quality_errors(errors)
    }

    fn do_persist(&self, payload: &Value) -> Result<i64, AdapterError> {
        let (metadata, data) = sections(payload)?;
        let run_pk = self.base.create_tool_run(metadata)?;
        let repo_root = str_field(data, "root_path").map(Path::new);

        let mut files = Vec::new();
        for (key, record) in records(data.get("files")) {
            let relative_path =
                normalize_file_path(record_path(key, record).unwrap_or_default(), repo_root);
            let filename = str_field(record, "name")
                .map(str::to_string)
                .or_else(|| relative_path.rsplit('/').next().map(str::to_string))
                .unwrap_or_default();
            files.push(LayoutFile {
                run_pk,
                file_id: str_field(record, "id").unwrap_or_default().to_string(),
                directory_id: str_field(record, "parent_directory_id")
                    .unwrap_or(ROOT_DIRECTORY_ID)
                    .to_string(),
                filename,
                extension: str_field(record, "extension").map(str::to_string),
                language: str_field(record, "language").map(str::to_string),
                category: str_field(record, "classification").map(str::to_string),
                size_bytes: opt_int_field(record, "size_bytes"),
                line_count: opt_int_field(record, "line_count"),
                is_binary: record.get("is_binary").and_then(Value::as_bool),
                relative_path,
            });
        }

        let mut directories = Vec::new();
        for (key, record) in records(data.get("directories")) {
            let relative_path =
                normalize_dir_path(record_path(key, record).unwrap_or_default(), repo_root);
            directories.push(LayoutDirectory {
                run_pk,
                directory_id: str_field(record, "id").unwrap_or_default().to_string(),
                parent_id: str_field(record, "parent_directory_id").map(str::to_string),
                depth: int_field(record, "depth", 0),
                file_count: opt_int_field(record, "recursive_file_count"),
                total_size_bytes: opt_int_field(record, "recursive_size_bytes"),
                relative_path,
            });
        }

        let repo = self.base.layout_repo();
        repo.insert_files(&files)?;
        repo.insert_directories(&directories)?;
        tracing::info!(
            run_pk,
            files = files.len(),
            directories = directories.len(),
            "Persisted layout"
        );
        Ok(run_pk)
    }
}
