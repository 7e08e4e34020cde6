use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DocumentRecord, SyncConfig, TableRef};
use crate::error::Result;
use crate::pipeline::processing::materialize::layout::{SheetGrid, SheetSelector};
use crate::pipeline::processing::materialize::RowFailure;

/// What a full replacement of a table's rows did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceOutcome {
    pub removed: u64,
    pub inserted: usize,
    pub failed: Vec<RowFailure>,
}

/// Read-only view of the ingested documents table.
#[async_trait]
pub trait DocumentStorePort: Send + Sync {
    /// Modification watermark of the newest version of `file_name`, without its body.
    async fn latest_modified(&self, table: &TableRef, file_name: &str) -> Result<Option<DateTime<Utc>>>;

    /// Newest version of `file_name`, including its content.
    async fn latest_document(&self, table: &TableRef, file_name: &str) -> Result<Option<DocumentRecord>>;
}

/// Typed access to destination tables. Implementations bind every value as a
/// query parameter; only validated or quoted identifiers reach SQL text.
#[async_trait]
pub trait TableStorePort: Send + Sync {
    /// Maximum stored `last_modified` value. Errors if the table does not exist.
    async fn latest_watermark(&self, table: &TableRef) -> Result<Option<DateTime<Utc>>>;

    /// Creates the table with text columns when it does not exist yet.
    async fn prepare_table(&self, table: &TableRef, columns: &[String]) -> Result<()>;

    /// Deletes every row, returning how many were removed.
    async fn clear_table(&self, table: &TableRef) -> Result<u64>;

    async fn insert_row(&self, table: &TableRef, columns: &[String], values: &[Option<String>]) -> Result<()>;

    async fn row_count(&self, table: &TableRef) -> Result<i64>;

    async fn column_names(&self, table: &TableRef) -> Result<Vec<String>>;

    async fn null_count(&self, table: &TableRef, column: &str) -> Result<i64>;

    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<i64>;

    /// Prepares the table, deletes every row and inserts `rows`. Rows the
    /// table refuses are reported in the outcome and skipped.
    ///
    /// This default issues the steps one by one. Stores with transactions
    /// override it so readers and concurrent writers see either the old
    /// contents or the new ones, never a mix.
    async fn replace_rows(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<ReplaceOutcome> {
        self.prepare_table(table, columns).await?;
        let mut outcome = ReplaceOutcome {
            removed: self.clear_table(table).await?,
            ..Default::default()
        };
        for (row_index, values) in rows.iter().enumerate() {
            match self.insert_row(table, columns, values).await {
                Ok(()) => outcome.inserted += 1,
                Err(e) => outcome.failed.push(RowFailure {
                    row_index,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }
}

/// Persistence for sync configs. Configs are immutable: there is no update.
#[async_trait]
pub trait ConfigStorePort: Send + Sync {
    async fn list(&self) -> Result<Vec<SyncConfig>>;
    async fn create(&self, config: &SyncConfig) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<SyncConfig>>;
    /// Returns false when no config had that id.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Decodes one worksheet of a workbook into a cell grid.
pub trait WorkbookReaderPort: Send + Sync {
    fn sheet_names(&self, bytes: &[u8]) -> Result<Vec<String>>;

    fn read_sheet(&self, bytes: &[u8], sheet: &SheetSelector) -> Result<SheetGrid>;
}
