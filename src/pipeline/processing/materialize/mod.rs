pub mod inspect;
pub mod layout;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ports::{DocumentStorePort, TableStorePort, WorkbookReaderPort};
use crate::constants::{LAST_MODIFIED_COLUMN, SUPPLIER_ID_COLUMN};
use crate::domain::{format_watermark, CellValue, DocumentContent, DocumentRecord, SyncConfig};
use crate::error::Result;
use crate::observability::metrics;
use layout::{LayoutProfile, ParsedSheet, SheetGrid, SheetSelector};

/// Outcome of a materialization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Success,
    Error,
}

/// A parsed row the destination refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    /// Zero-based index into the parsed data rows
    pub row_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub status: ParseStatus,
    pub message: String,
    /// Rows accepted by the destination, not rows parsed
    pub rows_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_rows: Vec<RowFailure>,
    /// SHA-256 of the decoded workbook bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
}

impl ParseResult {
    fn error(message: String) -> Self {
        Self {
            status: ParseStatus::Error,
            message,
            rows_processed: 0,
            supplier_id: None,
            columns: None,
            failed_rows: Vec::new(),
            content_sha256: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ParseStatus::Success
    }
}

/// Workbook content ready to be written: widened columns and rows.
#[derive(Debug, Clone)]
pub struct PreparedLoad {
    pub supplier_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub content_sha256: String,
}

/// Replaces a destination table's contents with the tracked spreadsheet.
pub struct TableMaterializer {
    documents: Arc<dyn DocumentStorePort>,
    tables: Arc<dyn TableStorePort>,
    reader: Arc<dyn WorkbookReaderPort>,
    layout: LayoutProfile,
}

impl TableMaterializer {
    pub fn new(
        documents: Arc<dyn DocumentStorePort>,
        tables: Arc<dyn TableStorePort>,
        reader: Arc<dyn WorkbookReaderPort>,
        layout: LayoutProfile,
    ) -> Self {
        Self {
            documents,
            tables,
            reader,
            layout,
        }
    }

    pub fn layout(&self) -> &LayoutProfile {
        &self.layout
    }

    pub async fn materialize(&self, config: &SyncConfig) -> ParseResult {
        let result = self.materialize_inner(config).await;
        match result.status {
            ParseStatus::Success => {
                metrics::materialize::rows_inserted(result.rows_processed as u64);
                metrics::materialize::rows_failed(result.failed_rows.len() as u64);
            }
            ParseStatus::Error => metrics::materialize::error(),
        }
        result
    }

    async fn materialize_inner(&self, config: &SyncConfig) -> ParseResult {
        let (docs_ref, target_ref) = match (config.documents_ref(), config.target_ref()) {
            (Ok(d), Ok(t)) => (d, t),
            (Err(e), _) | (_, Err(e)) => return ParseResult::error(format!("Invalid sync config: {}", e)),
        };

        let document = match self.documents.latest_document(&docs_ref, &config.file_name).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                return ParseResult::error(format!(
                    "Excel file {} not found in {}",
                    config.file_name, docs_ref
                ))
            }
            Err(e) => return ParseResult::error(format!("Error reading Excel file: {}", e)),
        };

        // Nothing below may touch the destination until the workbook parsed cleanly.
        let load = match self.prepare(&document) {
            Ok(load) => load,
            Err(e) => {
                warn!("Failed to parse {}: {}", config.file_name, e);
                return ParseResult::error(format!("Error parsing Excel: {}", e));
            }
        };
        debug!(
            "Parsed {} rows x {} columns from {} (sha256 {})",
            load.rows.len(),
            load.columns.len(),
            config.file_name,
            load.content_sha256
        );

        let values: Vec<Vec<Option<String>>> = load
            .rows
            .iter()
            .map(|row| row.iter().map(CellValue::to_sql_text).collect())
            .collect();
        let outcome = match self.tables.replace_rows(&target_ref, &load.columns, &values).await {
            Ok(outcome) => outcome,
            Err(e) => return ParseResult::error(format!("Error writing {}: {}", target_ref, e)),
        };
        info!("Replaced {} existing rows in {}", outcome.removed, target_ref);
        for failure in &outcome.failed {
            warn!(
                "Skipped row {} of {}: {}",
                failure.row_index, config.file_name, failure.reason
            );
        }
        let rows_processed = outcome.inserted;
        let failed_rows = outcome.failed;

        if load.rows.is_empty() {
            info!("{} has no data rows; {} left empty", config.file_name, target_ref);
            return ParseResult {
                status: ParseStatus::Success,
                message: "Empty table (cleared existing data)".to_string(),
                rows_processed: 0,
                supplier_id: Some(load.supplier_id),
                columns: Some(load.columns),
                failed_rows: Vec::new(),
                content_sha256: Some(load.content_sha256),
            };
        }

        let message = if failed_rows.is_empty() {
            "Table updated successfully".to_string()
        } else {
            format!(
                "Table updated with {} of {} rows; {} rows failed to insert",
                rows_processed,
                load.rows.len(),
                failed_rows.len()
            )
        };
        info!("{}: {}", target_ref, message);

        ParseResult {
            status: ParseStatus::Success,
            message,
            rows_processed,
            supplier_id: Some(load.supplier_id),
            columns: Some(load.columns),
            failed_rows,
            content_sha256: Some(load.content_sha256),
        }
    }

    pub fn sheet_names(&self, document: &DocumentRecord) -> Result<Vec<String>> {
        self.reader.sheet_names(&decode_content(&document.content)?)
    }

    /// Raw cell grid of one sheet, with no layout applied.
    pub fn read_grid(&self, document: &DocumentRecord, sheet: &SheetSelector) -> Result<SheetGrid> {
        self.reader.read_sheet(&decode_content(&document.content)?, sheet)
    }

    /// Decodes and parses a document without writing anything.
    pub fn prepare(&self, document: &DocumentRecord) -> Result<PreparedLoad> {
        let bytes = decode_content(&document.content)?;
        let content_sha256 = hex::encode(Sha256::digest(&bytes));
        let grid = self.reader.read_sheet(&bytes, &self.layout.selector())?;
        let parsed = self.layout.extract(&grid)?;
        Ok(widen(parsed, &format_watermark(&document.last_modified), content_sha256))
    }
}

/// Text content is base64 as written by connectors that cannot store binary.
pub fn decode_content(content: &DocumentContent) -> Result<Vec<u8>> {
    match content {
        DocumentContent::Binary(bytes) => Ok(bytes.clone()),
        DocumentContent::Text(text) => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
        }
    }
}

/// Appends the constant `supplier_id` and `last_modified` columns. A sheet
/// column with the same name in any letter case is overwritten and renamed,
/// since the destination matches column names case-insensitively.
fn widen(parsed: ParsedSheet, last_modified: &str, content_sha256: String) -> PreparedLoad {
    let ParsedSheet {
        supplier_id,
        mut columns,
        mut rows,
    } = parsed;
    let supplier_text = supplier_id.to_sql_text().unwrap_or_default();

    let synthetic = [
        (SUPPLIER_ID_COLUMN, CellValue::Text(supplier_text.clone())),
        (LAST_MODIFIED_COLUMN, CellValue::Text(last_modified.to_string())),
    ];
    for (name, value) in synthetic {
        match columns.iter().position(|c| c.eq_ignore_ascii_case(name)) {
            Some(idx) => {
                columns[idx] = name.to_string();
                for row in rows.iter_mut() {
                    row[idx] = value.clone();
                }
            }
            None => {
                columns.push(name.to_string());
                for row in rows.iter_mut() {
                    row.push(value.clone());
                }
            }
        }
    }

    PreparedLoad {
        supplier_id: supplier_text,
        columns,
        rows,
        content_sha256,
    }
}

#[cfg(test)]
mod tests {
    use super::layout::{SheetGrid, SheetSelector};
    use super::*;
    use crate::domain::TableRef;
    use crate::error::SyncError;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    struct OneDocument(Option<DocumentRecord>);

    #[async_trait]
    impl DocumentStorePort for OneDocument {
        async fn latest_modified(&self, _t: &TableRef, _f: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(self.0.as_ref().map(|d| d.last_modified))
        }
        async fn latest_document(&self, _t: &TableRef, _f: &str) -> Result<Option<DocumentRecord>> {
            Ok(self.0.clone())
        }
    }

    /// Ignores the bytes and hands back a fixed grid.
    struct FixedReader(Result<SheetGrid>);

    impl WorkbookReaderPort for FixedReader {
        fn sheet_names(&self, _bytes: &[u8]) -> Result<Vec<String>> {
            Ok(vec!["Sheet1".to_string()])
        }
        fn read_sheet(&self, _bytes: &[u8], _sheet: &SheetSelector) -> Result<SheetGrid> {
            match &self.0 {
                Ok(grid) => Ok(grid.clone()),
                Err(e) => Err(SyncError::Workbook(e.to_string())),
            }
        }
    }

    /// Records writes; rejects rows whose SKU equals `poison`.
    #[derive(Default)]
    struct RecordingTable {
        rows: Mutex<Vec<Vec<Option<String>>>>,
        cleared: Mutex<u32>,
        poison: Option<String>,
    }

    #[async_trait]
    impl TableStorePort for RecordingTable {
        async fn latest_watermark(&self, _t: &TableRef) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
        async fn prepare_table(&self, _t: &TableRef, _c: &[String]) -> Result<()> {
            Ok(())
        }
        async fn clear_table(&self, _t: &TableRef) -> Result<u64> {
            *self.cleared.lock().unwrap() += 1;
            let mut rows = self.rows.lock().unwrap();
            let n = rows.len() as u64;
            rows.clear();
            Ok(n)
        }
        async fn insert_row(&self, _t: &TableRef, _c: &[String], values: &[Option<String>]) -> Result<()> {
            if let (Some(p), Some(Some(sku))) = (&self.poison, values.get(1)) {
                if p == sku {
                    return Err(SyncError::Storage("near \"'\": syntax error".to_string()));
                }
            }
            self.rows.lock().unwrap().push(values.to_vec());
            Ok(())
        }
        async fn row_count(&self, _t: &TableRef) -> Result<i64> {
            Ok(self.rows.lock().unwrap().len() as i64)
        }
        async fn column_names(&self, _t: &TableRef) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn null_count(&self, _t: &TableRef, _c: &str) -> Result<i64> {
            Ok(0)
        }
        async fn distinct_count(&self, _t: &TableRef, _c: &str) -> Result<i64> {
            Ok(0)
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn grid_with_rows(n: usize) -> SheetGrid {
        let mut rows = vec![
            vec![text("Supplier"), text("SUP-042")],
            vec![],
            vec![text("Date"), text("SKU"), text("Qty")],
        ];
        for i in 0..n {
            rows.push(vec![text("2024-10-01"), text(&format!("SKU-{}", i)), CellValue::Int(i as i64)]);
        }
        SheetGrid::new(rows)
    }

    fn document(content: DocumentContent) -> DocumentRecord {
        DocumentRecord {
            file_name: "supplier_a.xlsx".to_string(),
            last_modified: Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap(),
            content,
        }
    }

    fn materializer(
        doc: Option<DocumentRecord>,
        grid: Result<SheetGrid>,
        table: Arc<RecordingTable>,
    ) -> TableMaterializer {
        TableMaterializer::new(
            Arc::new(OneDocument(doc)),
            table,
            Arc::new(FixedReader(grid)),
            LayoutProfile::default(),
        )
    }

    fn config() -> SyncConfig {
        SyncConfig::new("supplier_a", "main", "suppliers", "supplier_a.xlsx")
    }

    #[tokio::test]
    async fn missing_document_reports_error_without_touching_table() {
        let table = Arc::new(RecordingTable::default());
        let m = materializer(None, Ok(grid_with_rows(1)), table.clone());
        let result = m.materialize(&config()).await;
        assert_eq!(result.status, ParseStatus::Error);
        assert_eq!(result.rows_processed, 0);
        assert!(result.message.contains("not found"));
        assert_eq!(*table.cleared.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn parse_failure_keeps_previous_contents() {
        let table = Arc::new(RecordingTable::default());
        table.rows.lock().unwrap().push(vec![Some("old".to_string())]);
        let m = materializer(
            Some(document(DocumentContent::Binary(vec![1, 2, 3]))),
            Err(SyncError::Workbook("not a zip archive".to_string())),
            table.clone(),
        );
        let result = m.materialize(&config()).await;
        assert_eq!(result.status, ParseStatus::Error);
        assert!(result.message.starts_with("Error parsing Excel"));
        assert_eq!(table.rows.lock().unwrap().len(), 1);
        assert_eq!(*table.cleared.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn every_row_carries_supplier_and_watermark() {
        let table = Arc::new(RecordingTable::default());
        let m = materializer(
            Some(document(DocumentContent::Binary(b"xlsx".to_vec()))),
            Ok(grid_with_rows(3)),
            table.clone(),
        );
        let result = m.materialize(&config()).await;
        assert!(result.is_success());
        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.supplier_id.as_deref(), Some("SUP-042"));
        assert_eq!(
            result.columns.unwrap(),
            vec!["Date", "SKU", "Qty", "supplier_id", "last_modified"]
        );
        for row in table.rows.lock().unwrap().iter() {
            assert_eq!(row[3].as_deref(), Some("SUP-042"));
            assert_eq!(row[4].as_deref(), Some("2024-10-01T12:00:00.000000Z"));
        }
    }

    #[tokio::test]
    async fn one_bad_row_is_skipped_and_reported() {
        let table = Arc::new(RecordingTable {
            poison: Some("SKU-4".to_string()),
            ..Default::default()
        });
        let m = materializer(
            Some(document(DocumentContent::Binary(b"xlsx".to_vec()))),
            Ok(grid_with_rows(10)),
            table.clone(),
        );
        let result = m.materialize(&config()).await;
        assert_eq!(result.status, ParseStatus::Success);
        assert_eq!(result.rows_processed, 9);
        assert_eq!(result.failed_rows.len(), 1);
        assert_eq!(result.failed_rows[0].row_index, 4);
        assert_eq!(table.rows.lock().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn empty_frame_clears_table_and_succeeds() {
        let table = Arc::new(RecordingTable::default());
        table.rows.lock().unwrap().push(vec![Some("stale".to_string())]);
        let m = materializer(
            Some(document(DocumentContent::Binary(b"xlsx".to_vec()))),
            Ok(grid_with_rows(0)),
            table.clone(),
        );
        let result = m.materialize(&config()).await;
        assert!(result.is_success());
        assert_eq!(result.rows_processed, 0);
        assert!(result.message.contains("cleared"));
        assert!(table.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rerun_replaces_rather_than_appends() {
        let table = Arc::new(RecordingTable::default());
        let m = materializer(
            Some(document(DocumentContent::Binary(b"xlsx".to_vec()))),
            Ok(grid_with_rows(5)),
            table.clone(),
        );
        m.materialize(&config()).await;
        m.materialize(&config()).await;
        assert_eq!(table.rows.lock().unwrap().len(), 5);
    }

    #[test]
    fn base64_text_content_is_decoded() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"PK\x03\x04rest");
        let wrapped = format!("{}\n{}", &encoded[..4], &encoded[4..]);
        let bytes = decode_content(&DocumentContent::Text(wrapped)).unwrap();
        assert_eq!(bytes, b"PK\x03\x04rest");
        assert!(decode_content(&DocumentContent::Text("not base64!".to_string())).is_err());
    }

    #[test]
    fn widen_overwrites_existing_synthetic_column() {
        let parsed = ParsedSheet {
            supplier_id: CellValue::Int(77),
            columns: vec!["SKU".to_string(), "supplier_id".to_string()],
            rows: vec![vec![text("A"), text("wrong")]],
        };
        let load = widen(parsed, "2024-10-01T00:00:00.000000Z", String::new());
        assert_eq!(load.columns, vec!["SKU", "supplier_id", "last_modified"]);
        assert_eq!(load.rows[0][1], text("77"));
        assert_eq!(load.supplier_id, "77");
    }

    #[test]
    fn widen_matches_synthetic_columns_case_insensitively() {
        let parsed = ParsedSheet {
            supplier_id: text("SUP-1"),
            columns: vec!["SKU".to_string(), "Supplier_ID".to_string(), "LAST_MODIFIED".to_string()],
            rows: vec![vec![text("A"), text("other"), text("yesterday")]],
        };
        let load = widen(parsed, "2024-10-01T00:00:00.000000Z", String::new());
        assert_eq!(load.columns, vec!["SKU", "supplier_id", "last_modified"]);
        assert_eq!(load.rows[0][1], text("SUP-1"));
        assert_eq!(load.rows[0][2], text("2024-10-01T00:00:00.000000Z"));
    }
}
