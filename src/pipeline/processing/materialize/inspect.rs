//! Read-only views of a workbook used to pick a layout before syncing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::layout::{frame, SheetGrid};
use crate::domain::CellValue;
use crate::error::Result;

const SAMPLE_VALUES: usize = 3;

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(xlsx|xls)$").expect("extension pattern is valid"));
static UNSAFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("identifier pattern is valid"));

/// Warehouse column type suggested for a spreadsheet column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Bigint,
    Double,
    Boolean,
    Timestamp,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    pub nullable: bool,
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAnalysis {
    pub columns: Vec<ColumnProfile>,
    /// Data rows below the header
    pub row_count: usize,
    pub header_row: usize,
}

/// The first `limit` rows of a sheet as-is, with no header assumed.
pub fn raw_rows(grid: &SheetGrid, limit: usize) -> Vec<Vec<Option<String>>> {
    (0..grid.height().min(limit))
        .filter_map(|r| grid.row(r))
        .map(|row| {
            let mut values: Vec<Option<String>> = row.iter().map(CellValue::to_sql_text).collect();
            values.resize(grid.width(), None);
            values
        })
        .collect()
}

/// Profiles every column under `header_row` (zero-based).
pub fn analyze_columns(grid: &SheetGrid, header_row: usize) -> Result<ColumnAnalysis> {
    let (names, rows) = frame(grid, header_row)?;
    let columns = names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells: Vec<&CellValue> = rows.iter().map(|row| &row[idx]).collect();
            ColumnProfile {
                name,
                data_type: infer_type(&cells),
                nullable: cells.iter().any(|c| c.is_null()),
                sample_values: cells
                    .iter()
                    .filter(|c| !c.is_null())
                    .take(SAMPLE_VALUES)
                    .map(|c| c.to_string())
                    .collect(),
            }
        })
        .collect();
    Ok(ColumnAnalysis {
        columns,
        row_count: rows.len(),
        header_row,
    })
}

/// Narrowest type holding every non-null cell. Integral floats count as
/// integers since spreadsheets store all numbers as floats.
fn infer_type(cells: &[&CellValue]) -> ColumnType {
    let values: Vec<&CellValue> = cells.iter().copied().filter(|c| !c.is_null()).collect();
    if values.is_empty() {
        return ColumnType::String;
    }
    if values.iter().all(|c| matches!(c, CellValue::Bool(_))) {
        ColumnType::Boolean
    } else if values.iter().all(|c| matches!(c, CellValue::DateTime(_))) {
        ColumnType::Timestamp
    } else if values.iter().all(|c| match c {
        CellValue::Int(_) => true,
        CellValue::Float(f) => f.fract() == 0.0 && f.abs() < i64::MAX as f64,
        _ => false,
    }) {
        ColumnType::Bigint
    } else if values
        .iter()
        .all(|c| matches!(c, CellValue::Int(_) | CellValue::Float(_)))
    {
        ColumnType::Double
    } else {
        ColumnType::String
    }
}

/// Lower-case table name derived from a file name, e.g.
/// `Supplier A (2024).xlsx` becomes `supplier_a__2024`.
pub fn recommended_table_name(file_name: &str) -> String {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    let stem = EXTENSION_RE.replace(base, "");
    UNSAFE_RE
        .replace_all(&stem, "_")
        .trim_matches('_')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn grid() -> SheetGrid {
        let day = |d| {
            CellValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 10, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            )
        };
        SheetGrid::new(vec![
            vec![text("Supplier"), text("SUP-042")],
            vec![],
            vec![text("Date"), text("SKU"), text("Qty"), text("Price"), text("Active"), text("")],
            vec![day(1), text("A-1"), CellValue::Float(4.0), CellValue::Float(1.5), CellValue::Bool(true)],
            vec![day(2), text("A-2"), CellValue::Int(2), CellValue::Int(3), CellValue::Bool(false)],
            vec![day(3), CellValue::Null, CellValue::Float(7.0), CellValue::Float(2.25), CellValue::Null],
            vec![day(4), text("A-4"), CellValue::Int(1), CellValue::Float(9.0), CellValue::Bool(true)],
        ])
    }

    #[test]
    fn raw_rows_keep_banner_rows_and_pad() {
        let rows = raw_rows(&grid(), 3);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![Some("Supplier".into()), Some("SUP-042".into()), None, None, None, None]);
        assert!(rows[1].iter().all(Option::is_none));
        assert_eq!(rows[2][1].as_deref(), Some("SKU"));
        assert_eq!(raw_rows(&grid(), 100).len(), 7);
    }

    #[test]
    fn columns_are_typed_from_their_values() {
        let analysis = analyze_columns(&grid(), 2).unwrap();
        assert_eq!(analysis.row_count, 4);
        assert_eq!(analysis.header_row, 2);
        let types: Vec<_> = analysis.columns.iter().map(|c| (c.name.as_str(), c.data_type)).collect();
        assert_eq!(
            types,
            vec![
                ("Date", ColumnType::Timestamp),
                ("SKU", ColumnType::String),
                ("Qty", ColumnType::Bigint),
                ("Price", ColumnType::Double),
                ("Active", ColumnType::Boolean),
                ("Unnamed: 5", ColumnType::String),
            ]
        );
    }

    #[test]
    fn nullability_and_samples() {
        let analysis = analyze_columns(&grid(), 2).unwrap();
        let sku = &analysis.columns[1];
        assert!(sku.nullable);
        assert_eq!(sku.sample_values, vec!["A-1", "A-2", "A-4"]);
        let date = &analysis.columns[0];
        assert!(!date.nullable);
        assert_eq!(date.sample_values[0], "2024-10-01 00:00:00");
        assert!(analysis.columns[5].sample_values.is_empty());
    }

    #[test]
    fn other_header_rows_shift_the_frame() {
        let analysis = analyze_columns(&grid(), 0).unwrap();
        assert_eq!(analysis.columns[0].name, "Supplier");
        assert_eq!(analysis.row_count, 5);
        assert!(analyze_columns(&grid(), 40).is_err());
    }

    #[test]
    fn type_serializes_under_type_key() {
        let json = serde_json::to_value(ColumnProfile {
            name: "Qty".into(),
            data_type: ColumnType::Bigint,
            nullable: false,
            sample_values: vec!["4".into()],
        })
        .unwrap();
        assert_eq!(json["type"], "BIGINT");
    }

    #[test]
    fn table_names_from_file_names() {
        assert_eq!(recommended_table_name("Supplier A (2024).xlsx"), "supplier_a__2024");
        assert_eq!(recommended_table_name("shared/docs/orders.XLS"), "orders");
    }
}
