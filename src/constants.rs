//! Table and column name constants shared by the sync stages and the CLI.
//! The defaults match the first supplier feed this service was built for.

// Default table names for a sync config
pub const DEFAULT_DOCUMENTS_TABLE: &str = "documents";
pub const DEFAULT_TARGET_TABLE: &str = "supplier_a_data";

// Synthetic columns appended to every materialized row
pub const SUPPLIER_ID_COLUMN: &str = "supplier_id";
pub const LAST_MODIFIED_COLUMN: &str = "last_modified";

// Spreadsheet layout defaults: header on the third row, supplier id in B1
pub const DEFAULT_HEADER_ROW: u32 = 2;
pub const DEFAULT_SUPPLIER_ID_CELL: &str = "B1";

// Local warehouse table holding persisted sync configs
pub const SYNC_CONFIGS_TABLE: &str = "sync_configs";

/// Columns the quality audit requires unless the caller supplies its own list
pub fn default_required_columns() -> Vec<String> {
    ["Date", "SKU", "Qty", SUPPLIER_ID_COLUMN]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// Parse a comma-separated column list as given on the command line
pub fn parse_column_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
