//! Minimal `CREATE TABLE` parser.
//!
//! Good enough to diff adapter DDL against the canonical schema, nothing
//! more. Column fragments are split on top-level commas of the table body
//! without tracking nesting, so a comma inside a `DEFAULT (...)` expression
//! mis-splits; keep defaults comma-free.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

lazy_static! {
    static ref CREATE_TABLE: Regex =
        Regex::new(r"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(\w+)\s*\(").unwrap();
}

const CONSTRAINT_KEYWORDS: [&str; 4] = ["PRIMARY KEY", "UNIQUE", "FOREIGN KEY", "CHECK"];

/// Type pairs treated as equivalent, in either direction.
const COMPATIBLE_TYPES: [(&str, &str); 3] = [
    ("VARCHAR", "TEXT"),
    ("INTEGER", "INT"),
    ("INTEGER", "BIGINT"),
];

#[derive(Error, Debug)]
pub enum DdlError {
    #[error("Failed to read schema file {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Columns of one table, in declaration order, with uppercased types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns(Vec<(String, String)>);

impl TableColumns {
    fn insert(&mut self, name: String, ty: String) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = ty,
            None => self.0.push((name, ty)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Table name → columns.
pub type CanonicalSchema = BTreeMap<String, TableColumns>;

/// Parse every `CREATE TABLE` statement in `text`.
///
/// A header whose parentheses never balance contributes nothing.
pub fn parse_schema(text: &str) -> CanonicalSchema {
    let mut tables = CanonicalSchema::new();
    for caps in CREATE_TABLE.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        match extract_table_body(text, whole.end()) {
            Some(body) if body.trim().is_empty() => {
                tracing::debug!(table = name.as_str(), "Empty CREATE TABLE body")
            }
            Some(body) => {
                tables.insert(name.as_str().to_string(), parse_column_definitions(body));
            }
            None => tracing::debug!(table = name.as_str(), "Unbalanced CREATE TABLE body"),
        }
    }
    tables
}

/// Columns of the first table declared in a standalone DDL string.
pub fn parse_ddl_statement(ddl: &str) -> TableColumns {
    CREATE_TABLE
        .find(ddl)
        .and_then(|m| extract_table_body(ddl, m.end()))
        .map(parse_column_definitions)
        .unwrap_or_default()
}

/// Read and parse a schema file.
pub fn load_schema(path: &Path) -> Result<CanonicalSchema, DdlError> {
    let text = fs::read_to_string(path).map_err(|source| DdlError::IoError {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_schema(&text))
}

/// True for equal types (case-insensitive) or a compatible pair.
pub fn types_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_uppercase();
    let b = b.trim().to_uppercase();
    if a == b {
        return true;
    }
    COMPATIBLE_TYPES
        .iter()
        .any(|&(x, y)| (a == x && b == y) || (a == y && b == x))
}

/// Body between the opening paren (just before `start`) and its match.
fn extract_table_body(text: &str, start: usize) -> Option<&str> {
    let mut depth = 1usize;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_column_definitions(body: &str) -> TableColumns {
    let cleaned: Vec<&str> = body
        .lines()
        .map(|line| line.split("--").next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .collect();

    let mut columns = TableColumns::default();
    for fragment in cleaned.join("\n").split(',') {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        let upper = fragment.to_uppercase();
        if CONSTRAINT_KEYWORDS.iter().any(|kw| upper.contains(kw)) {
            continue;
        }
        let mut tokens = fragment.split_whitespace();
        if let (Some(name), Some(ty)) = (tokens.next(), tokens.next()) {
            columns.insert(name.to_string(), ty.to_uppercase());
        }
    }
    columns
}
