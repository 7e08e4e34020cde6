use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::NaiveDateTime;
use std::io::Cursor;
use tracing::debug;

use crate::app::ports::WorkbookReaderPort;
use crate::domain::CellValue;
use crate::error::{Result, SyncError};
use crate::pipeline::processing::materialize::layout::{SheetGrid, SheetSelector};

/// Decodes xlsx/xls/ods workbooks with calamine.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalamineReader;

impl CalamineReader {
    pub fn new() -> Self {
        Self
    }
}

fn convert(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::String(s) if s.trim().is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => CellValue::DateTime(ndt),
            None => CellValue::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::DateTime)
            .unwrap_or_else(|_| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

/// Expands a calamine range into a grid anchored at A1.
fn to_grid(range: &Range<Data>) -> SheetGrid {
    let Some((last_row, last_col)) = range.end() else {
        return SheetGrid::default();
    };
    let rows = (0..=last_row)
        .map(|r| {
            (0..=last_col)
                .map(|c| range.get_value((r, c)).map(convert).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();
    SheetGrid::new(rows)
}

fn open(bytes: &[u8]) -> Result<calamine::Sheets<Cursor<&[u8]>>> {
    open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| SyncError::Workbook(format!("cannot open workbook: {}", e)))
}

impl WorkbookReaderPort for CalamineReader {
    fn sheet_names(&self, bytes: &[u8]) -> Result<Vec<String>> {
        Ok(open(bytes)?.sheet_names())
    }

    fn read_sheet(&self, bytes: &[u8], sheet: &SheetSelector) -> Result<SheetGrid> {
        let mut workbook = open(bytes)?;

        let range = match sheet {
            SheetSelector::First => workbook
                .worksheet_range_at(0)
                .ok_or_else(|| SyncError::Workbook("workbook has no worksheets".to_string()))?,
            SheetSelector::Named(name) => workbook.worksheet_range(name),
        }
        .map_err(|e| SyncError::Workbook(format!("cannot read sheet {}: {}", sheet, e)))?;

        let grid = to_grid(&range);
        debug!("Read sheet {} ({} x {})", sheet, grid.height(), grid.width());
        Ok(grid)
    }
}
