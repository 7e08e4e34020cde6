//! Local SQLite stand-in for the warehouse.
//!
//! A three-part `catalog.schema.table` name maps to one physical table named
//! `catalog__schema__table`. Every part has passed identifier validation
//! before it reaches SQL text; values are always bound as parameters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::app::ports::{DocumentStorePort, ReplaceOutcome, TableStorePort};
use crate::pipeline::processing::materialize::RowFailure;
use crate::constants::LAST_MODIFIED_COLUMN;
use crate::domain::{format_watermark, parse_watermark, DocumentContent, DocumentRecord, TableRef};
use crate::error::{Result, SyncError};

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens (creating if needed) a SQLite database file in WAL mode.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| SyncError::Storage("warehouse connection lock poisoned".to_string()))
}

/// Physical table name for a three-part reference, unquoted.
pub fn physical_name(table: &TableRef) -> String {
    format!("{}__{}__{}", table.catalog(), table.schema(), table.table())
}

fn quoted_table(table: &TableRef) -> String {
    format!("\"{}\"", physical_name(table))
}

/// Spreadsheet headers are free text, so they are quoted rather than validated.
pub fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        info!("Opened warehouse at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Creates the documents table when missing.
    pub fn ensure_documents_table(&self, table: &TableRef) -> Result<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                file_name     TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                content       BLOB
            );",
            quoted_table(table)
        ))?;
        Ok(())
    }

    /// Stores one version of a file in a documents table, the way the
    /// ingestion connector would.
    pub fn put_document(
        &self,
        table: &TableRef,
        file_name: &str,
        last_modified: &DateTime<Utc>,
        content: &DocumentContent,
    ) -> Result<()> {
        self.ensure_documents_table(table)?;
        let conn = lock(&self.conn)?;
        let sql = format!(
            "INSERT INTO {} (file_name, last_modified, content) VALUES (?1, ?2, ?3)",
            quoted_table(table)
        );
        let watermark = format_watermark(last_modified);
        match content {
            DocumentContent::Binary(bytes) => {
                conn.execute(&sql, params![file_name, watermark, bytes])?;
            }
            DocumentContent::Text(text) => {
                conn.execute(&sql, params![file_name, watermark, text])?;
            }
        }
        debug!("Stored {} ({}) in {}", file_name, watermark, table);
        Ok(())
    }
}

#[async_trait]
impl DocumentStorePort for SqliteWarehouse {
    async fn latest_modified(&self, table: &TableRef, file_name: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT last_modified FROM {} WHERE file_name = ?1 ORDER BY last_modified DESC LIMIT 1",
            quoted_table(table)
        ))?;
        let mut rows = stmt.query(params![file_name])?;
        let latest = match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Some(parse_watermark(&raw)?)
            }
            None => None,
        };
        Ok(latest)
    }

    async fn latest_document(&self, table: &TableRef, file_name: &str) -> Result<Option<DocumentRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT last_modified, content FROM {} WHERE file_name = ?1 ORDER BY last_modified DESC LIMIT 1",
            quoted_table(table)
        ))?;
        let mut rows = stmt.query(params![file_name])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let raw: String = row.get(0)?;
        let content = match row.get_ref(1)? {
            ValueRef::Blob(bytes) => DocumentContent::Binary(bytes.to_vec()),
            ValueRef::Text(text) => DocumentContent::Text(String::from_utf8_lossy(text).into_owned()),
            other => {
                return Err(SyncError::Storage(format!(
                    "content of {} has unsupported type {}",
                    file_name,
                    other.data_type()
                )))
            }
        };
        Ok(Some(DocumentRecord {
            file_name: file_name.to_string(),
            last_modified: parse_watermark(&raw)?,
            content,
        }))
    }
}

fn existing_columns(conn: &Connection, table: &TableRef) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map(params![physical_name(table)], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Creates the table or adds the columns it lacks. SQLite identifiers are
/// case-insensitive, so `QTY` matches an existing `Qty`.
fn ensure_columns(conn: &Connection, table: &TableRef, columns: &[String]) -> Result<()> {
    let existing = existing_columns(conn, table)?;
    if existing.is_empty() {
        let defs = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_column(c)))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quoted_table(table),
            defs
        ))?;
        info!("Created table {} with {} columns", table, columns.len());
        return Ok(());
    }
    let mut known = existing;
    for column in columns {
        if known.iter().any(|e| e.eq_ignore_ascii_case(column)) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT;",
            quoted_table(table),
            quote_column(column)
        ))?;
        info!("Added column {} to {}", column, table);
        known.push(column.clone());
    }
    Ok(())
}

fn insert_sql(table: &TableRef, columns: &[String]) -> String {
    let names = columns.iter().map(|c| quote_column(c)).collect::<Vec<_>>().join(", ");
    let placeholders = (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", quoted_table(table), names, placeholders)
}

#[async_trait]
impl TableStorePort for SqliteWarehouse {
    async fn latest_watermark(&self, table: &TableRef) -> Result<Option<DateTime<Utc>>> {
        let conn = lock(&self.conn)?;
        let raw: Option<String> = conn.query_row(
            &format!(
                "SELECT MAX({}) FROM {}",
                quote_column(LAST_MODIFIED_COLUMN),
                quoted_table(table)
            ),
            [],
            |row| row.get(0),
        )?;
        raw.as_deref().map(parse_watermark).transpose()
    }

    async fn prepare_table(&self, table: &TableRef, columns: &[String]) -> Result<()> {
        if columns.is_empty() {
            return Err(SyncError::Storage(format!("no columns to create {} with", table)));
        }
        let conn = lock(&self.conn)?;
        ensure_columns(&conn, table, columns)
    }

    async fn clear_table(&self, table: &TableRef) -> Result<u64> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(&format!("DELETE FROM {}", quoted_table(table)), [])?;
        Ok(removed as u64)
    }

    async fn insert_row(&self, table: &TableRef, columns: &[String], values: &[Option<String>]) -> Result<()> {
        if columns.len() != values.len() {
            return Err(SyncError::Storage(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        let conn = lock(&self.conn)?;
        conn.execute(&insert_sql(table, columns), params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Runs the whole replacement in one `BEGIN IMMEDIATE` transaction so
    /// readers and other writers never see a cleared or half-loaded table.
    /// Each row gets its own savepoint; a rejected row is rolled back alone.
    async fn replace_rows(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<ReplaceOutcome> {
        if columns.is_empty() {
            return Err(SyncError::Storage(format!("no columns to create {} with", table)));
        }
        let mut conn = lock(&self.conn)?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_columns(&tx, table, columns)?;

        let removed = tx.execute(&format!("DELETE FROM {}", quoted_table(table)), [])? as u64;
        let sql = insert_sql(table, columns);
        let mut outcome = ReplaceOutcome {
            removed,
            ..ReplaceOutcome::default()
        };
        for (row_index, values) in rows.iter().enumerate() {
            if values.len() != columns.len() {
                outcome.failed.push(RowFailure {
                    row_index,
                    reason: format!("row has {} values for {} columns", values.len(), columns.len()),
                });
                continue;
            }
            let sp = tx.savepoint()?;
            match sp.execute(&sql, params_from_iter(values.iter())) {
                Ok(_) => {
                    sp.commit()?;
                    outcome.inserted += 1;
                }
                Err(e) => outcome.failed.push(RowFailure {
                    row_index,
                    reason: e.to_string(),
                }),
            }
        }
        tx.commit()?;
        debug!(
            "Replaced {} rows of {} with {} ({} failed)",
            outcome.removed,
            table,
            outcome.inserted,
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        let conn = lock(&self.conn)?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quoted_table(table)), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    async fn column_names(&self, table: &TableRef) -> Result<Vec<String>> {
        let conn = lock(&self.conn)?;
        let names = existing_columns(&conn, table)?;
        if names.is_empty() {
            return Err(SyncError::NotFound(format!("table {}", table)));
        }
        Ok(names)
    }

    async fn null_count(&self, table: &TableRef, column: &str) -> Result<i64> {
        let conn = lock(&self.conn)?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
                quoted_table(table),
                quote_column(column)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<i64> {
        let conn = lock(&self.conn)?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT {}) FROM {}",
                quote_column(column),
                quoted_table(table)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
