//! Tool adapters: payload in, landing-zone rows out.
//!
//! Every adapter declares a `const CONTRACT: AdapterContract` and implements
//! [`ToolAdapter`]. The trait fixes the four contract operations at compile
//! time; `persist` is the single entry point and always runs them in the
//! same order:
//!
//! 1. `validate_schema` against the tool's output schema
//! 2. `ensure_lz_tables` from the declared DDL
//! 3. `validate_lz_schema` against the live table definitions
//! 4. `validate_quality` on the `data` section
//! 5. `do_persist`

pub mod layout;
pub mod lizard;
pub mod scc;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::Value;
use thiserror::Error;

use crate::validation::parse_iso8601;

use crate::catalog::{repository_for, ToolRepository};
use crate::entities::ToolRun;
use crate::repositories::{check_table, LayoutRepository, PersistenceError, ToolRunRepository};
use crate::validation::{str_field, validate_json_schema};
use crate::LAYOUT_TOOL_NAMES;

/// Column name and declared type.
pub type ColumnSpec = (&'static str, &'static str);

/// Static contract every adapter declares.
#[derive(Debug)]
pub struct AdapterContract {
    pub tool_name: &'static str,
    /// Output schema location, relative to the project root.
    pub schema_path: &'static str,
    /// Expected columns per landing-zone table.
    pub lz_tables: &'static [(&'static str, &'static [ColumnSpec])],
    /// Data-quality rule names enforced by `validate_quality`.
    pub quality_rules: &'static [&'static str],
    /// `CREATE TABLE` statement per landing-zone table.
    pub table_ddl: &'static [(&'static str, &'static str)],
}

impl AdapterContract {
    pub fn ddl_for(&self, table: &str) -> Option<&'static str> {
        self.table_ddl
            .iter()
            .find(|(name, _)| *name == table)
            .map(|(_, ddl)| *ddl)
    }
}

/// Errors raised while persisting a payload.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Failed to load schema {path}: {reason}")]
    SchemaLoad { path: String, reason: String },

    #[error("{tool} schema validation failed ({} errors): {}", .errors.len(), .errors.join("; "))]
    SchemaValidation { tool: String, errors: Vec<String> },

    #[error("{tool} landing-zone schema drift: {}", .errors.join("; "))]
    LzSchema { tool: String, errors: Vec<String> },

    #[error("{tool} data quality errors ({} errors): {}", .errors.len(), .errors.join("; "))]
    Quality { tool: String, errors: Vec<String> },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Adapter requires {0}")]
    MissingRepository(&'static str),
}

impl From<rusqlite::Error> for AdapterError {
    fn from(err: rusqlite::Error) -> Self {
        AdapterError::Persistence(PersistenceError::Database(err))
    }
}

/// Collaborators handed to an adapter factory.
pub struct AdapterDeps<'c> {
    pub run_repo: ToolRunRepository<'c>,
    pub layout_repo: LayoutRepository<'c>,
    pub tool_repo: Option<ToolRepository<'c>>,
    pub project_root: PathBuf,
}

impl<'c> AdapterDeps<'c> {
    /// Generic repositories plus the tool-specific one, if registered.
    pub fn new(conn: &'c Connection, tool: &str, project_root: impl Into<PathBuf>) -> Self {
        Self {
            run_repo: ToolRunRepository::new(conn),
            layout_repo: LayoutRepository::new(conn),
            tool_repo: repository_for(tool, conn),
            project_root: project_root.into(),
        }
    }
}

/// Builds a boxed adapter from its collaborators.
pub type AdapterFactory =
    for<'c> fn(AdapterDeps<'c>) -> Result<Box<dyn ToolAdapter + 'c>, AdapterError>;

/// Shared adapter machinery, parameterised by a contract.
#[derive(Debug, Clone)]
pub struct BaseAdapter<'c> {
    run_repo: ToolRunRepository<'c>,
    layout_repo: LayoutRepository<'c>,
    project_root: PathBuf,
    contract: &'static AdapterContract,
}

impl<'c> BaseAdapter<'c> {
    pub fn new(deps: &AdapterDeps<'c>, contract: &'static AdapterContract) -> Self {
        Self {
            run_repo: deps.run_repo,
            layout_repo: deps.layout_repo,
            project_root: deps.project_root.clone(),
            contract,
        }
    }

    pub fn contract(&self) -> &'static AdapterContract {
        self.contract
    }

    pub fn layout_repo(&self) -> &LayoutRepository<'c> {
        &self.layout_repo
    }

    pub fn run_repo(&self) -> &ToolRunRepository<'c> {
        &self.run_repo
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn conn(&self) -> &'c Connection {
        self.run_repo.connection()
    }

    pub fn validate_schema(&self, payload: &Value) -> Result<(), AdapterError> {
        let path = self.project_root.join(self.contract.schema_path);
        let load_err = |reason: String| AdapterError::SchemaLoad {
            path: path.display().to_string(),
            reason,
        };
        let text = fs::read_to_string(&path).map_err(|e| load_err(e.to_string()))?;
        let schema: Value = serde_json::from_str(&text).map_err(|e| load_err(e.to_string()))?;

        validate_json_schema(&schema, payload).map_err(|errors| AdapterError::SchemaValidation {
            tool: self.contract.tool_name.to_string(),
            errors,
        })
    }

    /// Create any declared table that does not exist yet.
    pub fn ensure_lz_tables(&self) -> Result<(), AdapterError> {
        let conn = self.conn();
        for (table, ddl) in self.contract.table_ddl {
            check_table(table)?;
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )?;
            if exists == 0 {
                tracing::debug!(tool = %self.contract.tool_name, table = %table, "Creating landing-zone table");
                conn.execute_batch(ddl)?;
            }
        }
        Ok(())
    }

    /// Compare live column types against `lz_tables`.
    pub fn validate_lz_schema(&self) -> Result<(), AdapterError> {
        let conn = self.conn();
        let mut errors = Vec::new();

        for (table, columns) in self.contract.lz_tables {
            check_table(table)?;
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
            let actual: HashMap<String, String> = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?.to_uppercase()))
                })?
                .collect::<Result<_, _>>()?;

            if actual.is_empty() {
                errors.push(format!("{}: table missing", table));
                continue;
            }
            for (column, expected) in columns.iter() {
                match actual.get(*column) {
                    None => errors.push(format!("{}.{}: column missing", table, column)),
                    Some(found) if found != expected => errors.push(format!(
                        "{}.{}: type {} != {}",
                        table, column, found, expected
                    )),
                    Some(_) => {}
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AdapterError::LzSchema {
                tool: self.contract.tool_name.to_string(),
                errors,
            })
        }
    }

    /// Record this tool's run from the payload metadata.
    pub fn create_tool_run(&self, metadata: &Value) -> Result<i64, AdapterError> {
        let field = |name: &str| -> Result<String, AdapterError> {
            str_field(metadata, name)
                .map(str::to_string)
                .ok_or_else(|| AdapterError::MissingField(format!("metadata.{}", name)))
        };

        let raw_ts = field("timestamp")?;
        let timestamp = parse_iso8601(&raw_ts).ok_or_else(|| {
            PersistenceError::InvalidEntity(format!("timestamp '{}' is not ISO-8601", raw_ts))
        })?;

        let run_id = field("run_id")?;
        let run = ToolRun {
            collection_run_id: run_id.clone(),
            repo_id: field("repo_id")?,
            run_id,
            tool_name: self.contract.tool_name.to_string(),
            tool_version: field("tool_version")?,
            schema_version: field("schema_version")?,
            branch: field("branch")?,
            commit: field("commit")?,
            timestamp,
        };
        Ok(self.run_repo.insert(&run)?)
    }

    /// The layout run this collection's files were registered under.
    pub fn get_layout_run_pk(&self, collection_run_id: &str) -> Result<i64, AdapterError> {
        self.run_repo
            .get_run_pk_any(collection_run_id, LAYOUT_TOOL_NAMES)?
            .ok_or_else(|| {
                PersistenceError::NotFound(format!(
                    "layout run not found for collection {}",
                    collection_run_id
                ))
                .into()
            })
    }

    /// Log and raise collected data-quality problems.
    pub fn raise_quality_errors(&self, errors: Vec<String>) -> Result<(), AdapterError> {
        if errors.is_empty() {
            return Ok(());
        }
        for error in &errors {
            tracing::warn!(tool = %self.contract.tool_name, error = %error, "DATA_QUALITY_ERROR");
        }
        Err(AdapterError::Quality {
            tool: self.contract.tool_name.to_string(),
            errors,
        })
    }
}

/// Contract every tool adapter fulfils.
pub trait ToolAdapter {
    fn base(&self) -> &BaseAdapter<'_>;

    fn contract(&self) -> &'static AdapterContract {
        self.base().contract()
    }

    fn validate_schema(&self, payload: &Value) -> Result<(), AdapterError> {
        self.base().validate_schema(payload)
    }

    fn validate_lz_schema(&self) -> Result<(), AdapterError> {
        self.base().validate_lz_schema()
    }

    fn ensure_lz_tables(&self) -> Result<(), AdapterError> {
        self.base().ensure_lz_tables()
    }

    /// Tool-specific data-quality rules over the `data` section.
    fn validate_quality(&self, data: &Value) -> Result<(), AdapterError>;

    /// Write the payload; returns the new run's `run_pk`.
    fn do_persist(&self, payload: &Value) -> Result<i64, AdapterError>;

    fn persist(&self, payload: &Value) -> Result<i64, AdapterError> {
        self.validate_schema(payload)?;
        self.ensure_lz_tables()?;
        self.validate_lz_schema()?;
        let data = payload
            .get("data")
            .ok_or_else(|| AdapterError::MissingField("data".to_string()))?;
        self.validate_quality(data)?;
        self.do_persist(payload)
    }
}

/// `metadata` and `data` sections of a payload.
pub(crate) fn sections(payload: &Value) -> Result<(&Value, &Value), AdapterError> {
    let metadata = payload
        .get("metadata")
        .ok_or_else(|| AdapterError::MissingField("metadata".to_string()))?;
    let data = payload
        .get("data")
        .ok_or_else(|| AdapterError::MissingField("data".to_string()))?;
    Ok((metadata, data))
}

/// Entries of a section that may be a list or a path-keyed map.
pub(crate) fn records(section: Option<&Value>) -> Vec<(Option<&str>, &Value)> {
    match section {
        Some(Value::Array(items)) => items.iter().map(|v| (None, v)).collect(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        _ => Vec::new(),
    }
}

/// Collection run id recorded in the payload metadata.
pub(crate) fn collection_run_id(metadata: &Value) -> Result<&str, AdapterError> {
    str_field(metadata, "run_id").ok_or_else(|| AdapterError::MissingField("metadata.run_id".into()))
}
