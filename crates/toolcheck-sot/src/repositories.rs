//! Repositories over the landing-zone tables.
//!
//! Repositories borrow a single `rusqlite::Connection`; they hold no state
//! of their own and are cheap to copy. Table names are checked against a
//! whitelist before any SQL is assembled from them.

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::entities::{
    Entity, LayoutDirectory, LayoutFile, LizardFileMetric, LizardFunctionMetric, SccFileMetric,
    ToolRun,
};

/// Tables repositories and adapters may address by name.
pub const VALID_LZ_TABLES: &[&str] = &[
    "lz_tool_runs",
    "lz_layout_files",
    "lz_layout_directories",
    "lz_scc_file_metrics",
    "lz_lizard_file_metrics",
    "lz_lizard_function_metrics",
];

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Table not allowed: {0}")]
    InvalidTable(String),
}

/// Reject any table name outside [`VALID_LZ_TABLES`].
pub fn check_table(table: &str) -> Result<(), PersistenceError> {
    if VALID_LZ_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(PersistenceError::InvalidTable(table.to_string()))
    }
}

fn insert_sql(table: &str, columns: &[&str]) -> Result<String, PersistenceError> {
    check_table(table)?;
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    ))
}

fn validate_all<E: Entity>(rows: &[E]) -> Result<(), PersistenceError> {
    rows.iter().try_for_each(Entity::validate)
}

/// Run bookkeeping (`lz_tool_runs`).
#[derive(Debug, Clone, Copy)]
pub struct ToolRunRepository<'c> {
    conn: &'c Connection,
}

impl<'c> ToolRunRepository<'c> {
    pub const NAME: &'static str = "ToolRunRepository";
    pub const OPERATIONS: &'static [&'static str] = &["insert", "get_run_pk", "get_run_pk_any"];

    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Insert a run and return its generated `run_pk`.
    pub fn insert(&self, run: &ToolRun) -> Result<i64, PersistenceError> {
        run.validate()?;
        let sql = insert_sql(
            "lz_tool_runs",
            &[
                "collection_run_id",
                "repo_id",
                "run_id",
                "tool_name",
                "tool_version",
                "schema_version",
                "branch",
                "commit_sha",
                "timestamp",
            ],
        )?;
        self.conn.execute(
            &sql,
            params![
                run.collection_run_id,
                run.repo_id,
                run.run_id,
                run.tool_name,
                run.tool_version,
                run.schema_version,
                run.branch,
                run.commit,
                run.timestamp.to_rfc3339(),
            ],
        )?;
        let run_pk = self.conn.last_insert_rowid();
        tracing::debug!(tool = %run.tool_name, run_pk, "Inserted tool run");
        Ok(run_pk)
    }

    pub fn get_run_pk(
        &self,
        collection_run_id: &str,
        tool_name: &str,
    ) -> Result<Option<i64>, PersistenceError> {
        let run_pk = self
            .conn
            .query_row(
                "SELECT run_pk FROM lz_tool_runs WHERE collection_run_id = ?1 AND tool_name = ?2",
                params![collection_run_id, tool_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(run_pk)
    }

    /// First run found under any of `tool_names`, in order.
    pub fn get_run_pk_any(
        &self,
        collection_run_id: &str,
        tool_names: &[&str],
    ) -> Result<Option<i64>, PersistenceError> {
        for tool_name in tool_names {
            if let Some(run_pk) = self.get_run_pk(collection_run_id, tool_name)? {
                return Ok(Some(run_pk));
            }
        }
        Ok(None)
    }
}

/// File and directory layout (`lz_layout_files`, `lz_layout_directories`).
#[derive(Debug, Clone, Copy)]
pub struct LayoutRepository<'c> {
    conn: &'c Connection,
}

impl<'c> LayoutRepository<'c> {
    pub const NAME: &'static str = "LayoutRepository";
    pub const OPERATIONS: &'static [&'static str] =
        &["insert_files", "insert_directories", "get_file_record"];

    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn insert_files(&self, files: &[LayoutFile]) -> Result<usize, PersistenceError> {
        validate_all(files)?;
        let sql = insert_sql(
            "lz_layout_files",
            &[
                "run_pk",
                "file_id",
                "relative_path",
                "directory_id",
                "filename",
                "extension",
                "language",
                "category",
                "size_bytes",
                "line_count",
                "is_binary",
            ],
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        for f in files {
            stmt.execute(params![
                f.run_pk,
                f.file_id,
                f.relative_path,
                f.directory_id,
                f.filename,
                f.extension,
                f.language,
                f.category,
                f.size_bytes,
                f.line_count,
                f.is_binary,
            ])?;
        }
        Ok(files.len())
    }

    pub fn insert_directories(&self, dirs: &[LayoutDirectory]) -> Result<usize, PersistenceError> {
        validate_all(dirs)?;
        let sql = insert_sql(
            "lz_layout_directories",
            &[
                "run_pk",
                "directory_id",
                "relative_path",
                "parent_id",
                "depth",
                "file_count",
                "total_size_bytes",
            ],
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        for d in dirs {
            stmt.execute(params![
                d.run_pk,
                d.directory_id,
                d.relative_path,
                d.parent_id,
                d.depth,
                d.file_count,
                d.total_size_bytes,
            ])?;
        }
        Ok(dirs.len())
    }

    /// Resolve `(file_id, directory_id)` for a path in a layout run.
    pub fn get_file_record(
        &self,
        run_pk: i64,
        relative_path: &str,
    ) -> Result<(String, String), PersistenceError> {
        self.conn
            .query_row(
                "SELECT file_id, directory_id FROM lz_layout_files \
                 WHERE run_pk = ?1 AND relative_path = ?2",
                params![run_pk, relative_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| {
                PersistenceError::NotFound(format!("layout file not found: {}", relative_path))
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SccRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SccRepository<'c> {
    pub const NAME: &'static str = "SccRepository";
    pub const OPERATIONS: &'static [&'static str] = &["insert_file_metrics"];

    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn insert_file_metrics(&self, rows: &[SccFileMetric]) -> Result<usize, PersistenceError> {
        validate_all(rows)?;
        let sql = insert_sql(
            "lz_scc_file_metrics",
            &[
                "run_pk",
                "file_id",
                "directory_id",
                "relative_path",
                "filename",
                "extension",
                "language",
                "lines_total",
                "code_lines",
                "comment_lines",
                "blank_lines",
                "bytes",
                "complexity",
            ],
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        for r in rows {
            stmt.execute(params![
                r.run_pk,
                r.file_id,
                r.directory_id,
                r.relative_path,
                r.filename,
                r.extension,
                r.language,
                r.lines_total,
                r.code_lines,
                r.comment_lines,
                r.blank_lines,
                r.bytes,
                r.complexity,
            ])?;
        }
        Ok(rows.len())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LizardRepository<'c> {
    conn: &'c Connection,
}

impl<'c> LizardRepository<'c> {
    pub const NAME: &'static str = "LizardRepository";
    pub const OPERATIONS: &'static [&'static str] =
        &["insert_file_metrics", "insert_function_metrics"];

    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn insert_file_metrics(
        &self,
        rows: &[LizardFileMetric],
    ) -> Result<usize, PersistenceError> {
        validate_all(rows)?;
        let sql = insert_sql(
            "lz_lizard_file_metrics",
            &[
                "run_pk",
                "file_id",
                "relative_path",
                "language",
                "nloc",
                "function_count",
                "total_ccn",
                "avg_ccn",
                "max_ccn",
            ],
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        for r in rows {
            stmt.execute(params![
                r.run_pk,
                r.file_id,
                r.relative_path,
                r.language,
                r.nloc,
                r.function_count,
                r.total_ccn,
                r.avg_ccn,
                r.max_ccn,
            ])?;
        }
        Ok(rows.len())
    }

    pub fn insert_function_metrics(
        &self,
        rows: &[LizardFunctionMetric],
    ) -> Result<usize, PersistenceError> {
        validate_all(rows)?;
        let sql = insert_sql(
            "lz_lizard_function_metrics",
            &[
                "run_pk",
                "file_id",
                "function_name",
                "long_name",
                "ccn",
                "nloc",
                "params",
                "token_count",
                "line_start",
                "line_end",
            ],
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        for r in rows {
            stmt.execute(params![
                r.run_pk,
                r.file_id,
                r.function_name,
                r.long_name,
                r.ccn,
                r.nloc,
                r.params,
                r.token_count,
                r.line_start,
                r.line_end,
            ])?;
        }
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CANONICAL_SCHEMA_SQL;
    use chrono::Utc;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CANONICAL_SCHEMA_SQL).unwrap();
        conn
    }

    fn run(tool: &str) -> ToolRun {
        ToolRun {
            collection_run_id: "collection-1".to_string(),
            repo_id: "repo-1".to_string(),
            run_id: "collection-1".to_string(),
            tool_name: tool.to_string(),
            tool_version: "1.0.0".to_string(),
            schema_version: "1.0.0".to_string(),
            branch: "main".to_string(),
            commit: "0".repeat(40),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_lookup_run() {
        let conn = open();
        let repo = ToolRunRepository::new(&conn);
        let run_pk = repo.insert(&run("layout-scanner")).unwrap();
        assert!(run_pk > 0);
        assert_eq!(
            repo.get_run_pk("collection-1", "layout-scanner").unwrap(),
            Some(run_pk)
        );
        assert_eq!(repo.get_run_pk("collection-1", "scc").unwrap(), None);
    }

    #[test]
    fn test_get_run_pk_any_uses_first_match() {
        let conn = open();
        let repo = ToolRunRepository::new(&conn);
        let run_pk = repo.insert(&run("layout")).unwrap();
        let found = repo
            .get_run_pk_any("collection-1", &["layout-scanner", "layout"])
            .unwrap();
        assert_eq!(found, Some(run_pk));
    }

    #[test]
    fn test_duplicate_run_rejected() {
        let conn = open();
        let repo = ToolRunRepository::new(&conn);
        repo.insert(&run("scc")).unwrap();
        assert!(matches!(
            repo.insert(&run("scc")),
            Err(PersistenceError::Database(_))
        ));
    }

    #[test]
    fn test_file_record_lookup() {
        let conn = open();
        let run_pk = ToolRunRepository::new(&conn)
            .insert(&run("layout-scanner"))
            .unwrap();
        let layout = LayoutRepository::new(&conn);
        layout
            .insert_files(&[LayoutFile {
                run_pk,
                file_id: "f-000000000001".to_string(),
                relative_path: "src/app.py".to_string(),
                directory_id: "d-root".to_string(),
                filename: "app.py".to_string(),
                ..Default::default()
            }])
            .unwrap();

        let (file_id, dir_id) = layout.get_file_record(run_pk, "src/app.py").unwrap();
        assert_eq!(file_id, "f-000000000001");
        assert_eq!(dir_id, "d-root");

        let missing = layout.get_file_record(run_pk, "src/other.py").unwrap_err();
        assert_eq!(missing.to_string(), "Not found: layout file not found: src/other.py");
    }

    #[test]
    fn test_table_whitelist() {
        assert!(check_table("lz_scc_file_metrics").is_ok());
        assert!(matches!(
            check_table("sqlite_master; DROP TABLE x"),
            Err(PersistenceError::InvalidTable(_))
        ));
    }
}
