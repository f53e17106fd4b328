//! # toolcheck-sot
//!
//! Landing-zone persistence layer for tool outputs.
//!
//! Each wrapped analysis tool ships an adapter that maps its JSON output
//! envelope into `lz_*` tables. The compliance engine never trusts an
//! adapter by reading it alone; it inspects the adapter's declared contract
//! and then drives it against a live database.
//!
//! ## Layout
//!
//! - [`entities`]: immutable row types, one per landing-zone table
//! - [`repositories`]: thin `rusqlite` writers and lookups
//! - [`adapters`]: the [`ToolAdapter`] trait plus the bundled adapters
//! - [`catalog`]: the single registration point the engine introspects
//!
//! ## Example
//!
//! ```rust,ignore
//! use rusqlite::Connection;
//! use toolcheck_sot::{catalog, AdapterDeps, CANONICAL_SCHEMA_SQL};
//!
//! let conn = Connection::open_in_memory()?;
//! conn.execute_batch(CANONICAL_SCHEMA_SQL)?;
//!
//! let registration = catalog::find_adapter("persistence.adapters.lizard", "LizardAdapter")
//!     .expect("bundled adapter");
//! let adapter = (registration.factory)(AdapterDeps::new(&conn, "lizard", project_root))?;
//! let run_pk = adapter.persist(&payload)?;
//! ```

pub mod adapters;
pub mod catalog;
pub mod entities;
pub mod repositories;
pub mod validation;

pub use adapters::{
    AdapterContract, AdapterDeps, AdapterError, AdapterFactory, BaseAdapter, ToolAdapter,
};
pub use catalog::{AdapterRegistration, EntityDescriptor, RepositoryDescriptor, ToolRepository};
pub use entities::{
    Entity, LayoutDirectory, LayoutFile, LizardFileMetric, LizardFunctionMetric, SccFileMetric,
    ToolRun,
};
pub use repositories::{
    LayoutRepository, LizardRepository, PersistenceError, SccRepository, ToolRunRepository,
};

/// Canonical landing-zone DDL shipped with this crate.
///
/// Projects keep their own copy on disk; this one backs the crate's tests
/// and seeds throwaway projects.
pub const CANONICAL_SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Tool names under which a layout run may have been recorded.
pub const LAYOUT_TOOL_NAMES: &[&str] = &["layout-scanner", "layout"];
