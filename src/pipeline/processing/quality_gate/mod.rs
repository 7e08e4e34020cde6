use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::ports::TableStorePort;
use crate::constants::{default_required_columns, SUPPLIER_ID_COLUMN};
use crate::domain::SyncConfig;
use crate::observability::metrics;

/// The fixed battery of post-load checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheckKind {
    /// Table is queryable and holds at least one row
    RowCount,
    /// Every required column exists; extra columns are fine
    RequiredColumns,
    /// No NULLs in the required columns that exist
    NullValues,
    /// Exactly one distinct supplier across all rows
    SupplierConsistency,
}

impl QualityCheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCheckKind::RowCount => "row_count",
            QualityCheckKind::RequiredColumns => "required_columns",
            QualityCheckKind::NullValues => "null_values",
            QualityCheckKind::SupplierConsistency => "supplier_consistency",
        }
    }
}

/// One named, independently evaluated assertion about the destination table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub check: QualityCheckKind,
    pub passed: bool,
    pub value: Value,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// The checks ran; see `checks_passed`
    Success,
    /// The table could not be queried at all
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checks_passed: bool,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub quality_checks: Vec<QualityCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

impl QualityReport {
    fn unreachable_table(message: String) -> Self {
        Self {
            status: AuditStatus::Error,
            message: Some(message),
            checks_passed: false,
            total_checks: 0,
            passed_checks: 0,
            failed_checks: 0,
            quality_checks: Vec::new(),
            row_count: None,
        }
    }

    fn from_checks(quality_checks: Vec<QualityCheck>, row_count: i64) -> Self {
        let total_checks = quality_checks.len();
        let passed_checks = quality_checks.iter().filter(|c| c.passed).count();
        Self {
            status: AuditStatus::Success,
            message: None,
            checks_passed: quality_checks.iter().all(|c| c.passed),
            total_checks,
            passed_checks,
            failed_checks: total_checks - passed_checks,
            quality_checks,
            row_count: Some(row_count),
        }
    }

    pub fn check(&self, kind: QualityCheckKind) -> Option<&QualityCheck> {
        self.quality_checks.iter().find(|c| c.check == kind)
    }
}

/// Runs the post-load checks against a sync config's destination table
pub struct QualityAuditor {
    tables: Arc<dyn TableStorePort>,
    required_columns: Vec<String>,
}

impl QualityAuditor {
    /// Auditor requiring the default `Date`, `SKU`, `Qty`, `supplier_id` columns
    pub fn new(tables: Arc<dyn TableStorePort>) -> Self {
        Self::with_required_columns(tables, default_required_columns())
    }

    pub fn with_required_columns(tables: Arc<dyn TableStorePort>, required_columns: Vec<String>) -> Self {
        Self {
            tables,
            required_columns,
        }
    }

    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }

    pub async fn audit(&self, config: &SyncConfig) -> QualityReport {
        self.audit_with(config, &self.required_columns).await
    }

    /// Audit with a caller-supplied column list instead of the configured one
    pub async fn audit_with(&self, config: &SyncConfig, required_columns: &[String]) -> QualityReport {
        let report = self.audit_inner(config, required_columns).await;
        for check in &report.quality_checks {
            metrics::audit::check_result(check.check.as_str(), check.passed);
        }
        if report.status == AuditStatus::Error {
            metrics::audit::table_unreachable();
        }
        report
    }

    async fn audit_inner(&self, config: &SyncConfig, required_columns: &[String]) -> QualityReport {
        let table = match config.target_ref() {
            Ok(t) => t,
            Err(e) => return QualityReport::unreachable_table(format!("Invalid sync config: {}", e)),
        };

        // 1. Existence / row count; nothing else is meaningful without it
        let row_count = match self.tables.row_count(&table).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Quality audit could not query {}: {}", table, e);
                return QualityReport::unreachable_table(format!("Table not found: {}", e));
            }
        };

        let mut checks = vec![QualityCheck {
            check: QualityCheckKind::RowCount,
            passed: row_count > 0,
            value: json!(row_count),
            message: format!("Table has {} rows", row_count),
            missing_columns: None,
        }];

        // 2. Required columns
        let actual_columns = match self.tables.column_names(&table).await {
            Ok(cols) => {
                let missing: Vec<String> = required_columns
                    .iter()
                    .filter(|c| !cols.contains(*c))
                    .cloned()
                    .collect();
                checks.push(QualityCheck {
                    check: QualityCheckKind::RequiredColumns,
                    passed: missing.is_empty(),
                    value: json!(cols),
                    message: if missing.is_empty() {
                        "All required columns present".to_string()
                    } else {
                        format!("Missing columns: {:?}", missing)
                    },
                    missing_columns: Some(missing),
                });
                Some(cols)
            }
            Err(e) => {
                checks.push(QualityCheck {
                    check: QualityCheckKind::RequiredColumns,
                    passed: false,
                    value: json!([]),
                    message: format!("Error checking columns: {}", e),
                    missing_columns: None,
                });
                None
            }
        };

        // 3. Nulls in key columns
        if row_count > 0 {
            checks.push(match &actual_columns {
                Some(cols) => self.null_check(&table, required_columns, cols).await,
                None => QualityCheck {
                    check: QualityCheckKind::NullValues,
                    passed: false,
                    value: json!({}),
                    message: "Column metadata unavailable; null counts not computed".to_string(),
                    missing_columns: None,
                },
            });
        }

        // 4. Supplier consistency
        let has_supplier = actual_columns
            .as_ref()
            .map(|cols| cols.iter().any(|c| c == SUPPLIER_ID_COLUMN))
            .unwrap_or(false);
        if row_count > 0 && has_supplier {
            checks.push(match self.tables.distinct_count(&table, SUPPLIER_ID_COLUMN).await {
                Ok(distinct) => QualityCheck {
                    check: QualityCheckKind::SupplierConsistency,
                    passed: distinct == 1,
                    value: json!(distinct),
                    message: format!("Found {} distinct supplier(s)", distinct),
                    missing_columns: None,
                },
                Err(e) => QualityCheck {
                    check: QualityCheckKind::SupplierConsistency,
                    passed: false,
                    value: json!(0),
                    message: format!("Error checking supplier consistency: {}", e),
                    missing_columns: None,
                },
            });
        }

        let report = QualityReport::from_checks(checks, row_count);
        info!(
            "Quality audit of {}: {}/{} checks passed",
            table, report.passed_checks, report.total_checks
        );
        report
    }

    async fn null_check(
        &self,
        table: &crate::domain::TableRef,
        required_columns: &[String],
        actual_columns: &[String],
    ) -> QualityCheck {
        let mut null_counts: BTreeMap<String, i64> = BTreeMap::new();
        for col in required_columns.iter().filter(|c| actual_columns.contains(*c)) {
            match self.tables.null_count(table, col).await {
                Ok(n) => {
                    null_counts.insert(col.clone(), n);
                }
                Err(e) => {
                    return QualityCheck {
                        check: QualityCheckKind::NullValues,
                        passed: false,
                        value: json!({}),
                        message: format!("Error checking nulls: {}", e),
                        missing_columns: None,
                    }
                }
            }
        }
        let total: i64 = null_counts.values().sum();
        QualityCheck {
            check: QualityCheckKind::NullValues,
            passed: total == 0,
            value: json!(null_counts),
            message: format!("Null counts: {:?}", null_counts),
            missing_columns: None,
        }
    }
}
