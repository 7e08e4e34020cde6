//! Domain data shapes shared across layers.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{DEFAULT_DOCUMENTS_TABLE, DEFAULT_TARGET_TABLE};
use crate::error::{Result, SyncError};

static IDENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Returns true when `ident` is safe to splice into SQL as a quoted identifier.
pub fn is_valid_ident(ident: &str) -> bool {
    ident.len() <= 128 && IDENT_RE.is_match(ident)
}

fn check_ident(kind: &str, ident: &str) -> Result<()> {
    if is_valid_ident(ident) {
        Ok(())
    } else {
        Err(SyncError::InvalidIdentifier(format!("{} '{}'", kind, ident)))
    }
}

fn default_documents_table() -> String {
    DEFAULT_DOCUMENTS_TABLE.to_string()
}

fn default_target_table() -> String {
    DEFAULT_TARGET_TABLE.to_string()
}

/// One tracked sync relationship: a spreadsheet in a documents table and the
/// destination table it is materialized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub id: String,
    pub catalog: String,
    #[serde(alias = "schema_name")]
    pub schema: String,
    pub file_name: String,
    #[serde(default = "default_documents_table")]
    pub documents_table: String,
    #[serde(default = "default_target_table")]
    pub target_table: String,
}

impl SyncConfig {
    pub fn new(id: &str, catalog: &str, schema: &str, file_name: &str) -> Self {
        Self {
            id: id.to_string(),
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            file_name: file_name.to_string(),
            documents_table: default_documents_table(),
            target_table: default_target_table(),
        }
    }

    pub fn with_documents_table(mut self, table: &str) -> Self {
        self.documents_table = table.to_string();
        self
    }

    pub fn with_target_table(mut self, table: &str) -> Self {
        self.target_table = table.to_string();
        self
    }

    /// Checks every identifier that ends up in SQL text.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::Config("sync config id must not be empty".to_string()));
        }
        if self.file_name.trim().is_empty() {
            return Err(SyncError::Config("file_name must not be empty".to_string()));
        }
        check_ident("catalog", &self.catalog)?;
        check_ident("schema", &self.schema)?;
        check_ident("documents_table", &self.documents_table)?;
        check_ident("target_table", &self.target_table)?;
        Ok(())
    }

    pub fn documents_ref(&self) -> Result<TableRef> {
        TableRef::new(&self.catalog, &self.schema, &self.documents_table)
    }

    pub fn target_ref(&self) -> Result<TableRef> {
        TableRef::new(&self.catalog, &self.schema, &self.target_table)
    }
}

/// A validated three-part table name (`catalog.schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    catalog: String,
    schema: String,
    table: String,
}

impl TableRef {
    pub fn new(catalog: &str, schema: &str, table: &str) -> Result<Self> {
        check_ident("catalog", catalog)?;
        check_ident("schema", schema)?;
        check_ident("table", table)?;
        Ok(Self {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

/// Stored representation of an ingested file body. Connectors differ: some
/// land raw bytes, others base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Binary(Vec<u8>),
    Text(String),
}

/// Latest version of one ingested file.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub file_name: String,
    pub last_modified: DateTime<Utc>,
    pub content: DocumentContent,
}

/// Formats a watermark the way it is stored in target tables. Fixed precision
/// and a `Z` suffix keep lexical and chronological order identical.
pub fn format_watermark(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_watermark(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Storage(format!("invalid watermark '{}': {}", raw, e)))
}

/// A single spreadsheet cell after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Float(f) => f.is_nan(),
            CellValue::Text(_) | CellValue::Int(_) | CellValue::Bool(_) | CellValue::DateTime(_) => {
                false
            }
        }
    }

    /// Text bound into the destination table; `None` becomes SQL NULL.
    pub fn to_sql_text(&self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        match self {
            CellValue::Text(s) => Some(s.clone()),
            CellValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, ""),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}
