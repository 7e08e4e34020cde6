use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ports::{DocumentStorePort, TableStorePort};
use crate::domain::SyncConfig;
use crate::observability::metrics;

/// Whether a sync run should proceed, and why. Computed fresh on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub should_process: bool,
    pub reason: String,
    pub file_last_updated: Option<DateTime<Utc>>,
    pub table_last_updated: Option<DateTime<Utc>>,
}

impl GateDecision {
    fn stop(reason: String) -> Self {
        Self {
            should_process: false,
            reason,
            file_last_updated: None,
            table_last_updated: None,
        }
    }
}

/// Compares the source file's modification watermark with the newest one
/// stored in the destination table. Never reads the spreadsheet body.
pub struct ChangeGate {
    documents: Arc<dyn DocumentStorePort>,
    tables: Arc<dyn TableStorePort>,
}

impl ChangeGate {
    pub fn new(documents: Arc<dyn DocumentStorePort>, tables: Arc<dyn TableStorePort>) -> Self {
        Self { documents, tables }
    }

    pub async fn evaluate(&self, config: &SyncConfig) -> GateDecision {
        let decision = self.evaluate_inner(config).await;
        metrics::gate::decision(decision.should_process);
        decision
    }

    async fn evaluate_inner(&self, config: &SyncConfig) -> GateDecision {
        let (docs_ref, target_ref) = match (config.documents_ref(), config.target_ref()) {
            (Ok(d), Ok(t)) => (d, t),
            (Err(e), _) | (_, Err(e)) => return GateDecision::stop(format!("Invalid sync config: {}", e)),
        };

        // A failure to check is "nothing to do", never a hard error.
        let file_last_updated = match self.documents.latest_modified(&docs_ref, &config.file_name).await {
            Ok(Some(ts)) => ts,
            Ok(None) => {
                info!("{} not found in {}", config.file_name, docs_ref);
                return GateDecision::stop(format!(
                    "File {} not found in documents table {}",
                    config.file_name, docs_ref
                ));
            }
            Err(e) => {
                warn!("Error reading {}: {}", docs_ref, e);
                return GateDecision::stop(format!("Error reading documents table: {}", e));
            }
        };

        // Missing or unreadable destination means bootstrap.
        let table_last_updated = match self.tables.latest_watermark(&target_ref).await {
            Ok(ts) => ts,
            Err(e) => {
                debug!("Watermark read on {} failed: {}", target_ref, e);
                return GateDecision {
                    should_process: true,
                    reason: format!(
                        "Target table {} does not exist or is unreadable; initial load required",
                        target_ref
                    ),
                    file_last_updated: Some(file_last_updated),
                    table_last_updated: None,
                };
            }
        };

        let (should_process, reason) = match table_last_updated {
            None => (
                true,
                "Target table has no stored watermark; full load required".to_string(),
            ),
            Some(table_ts) if file_last_updated > table_ts => {
                (true, "File has newer changes than table".to_string())
            }
            Some(_) => (
                false,
                "No new updates detected; table is up to date".to_string(),
            ),
        };

        GateDecision {
            should_process,
            reason,
            file_last_updated: Some(file_last_updated),
            table_last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocumentRecord, TableRef};
    use crate::error::{Result, SyncError};
    use async_trait::async_trait;
    use chrono::TimeZone;

    enum Docs {
        Missing,
        Broken,
        At(DateTime<Utc>),
    }

    #[async_trait]
    impl DocumentStorePort for Docs {
        async fn latest_modified(&self, _t: &TableRef, _f: &str) -> Result<Option<DateTime<Utc>>> {
            match self {
                Docs::Missing => Ok(None),
                Docs::Broken => Err(SyncError::Storage("warehouse timed out".to_string())),
                Docs::At(ts) => Ok(Some(*ts)),
            }
        }
        async fn latest_document(&self, _t: &TableRef, _f: &str) -> Result<Option<DocumentRecord>> {
            panic!("the gate must not read document bodies")
        }
    }

    enum Target {
        Absent,
        Empty,
        At(DateTime<Utc>),
    }

    #[async_trait]
    impl TableStorePort for Target {
        async fn latest_watermark(&self, t: &TableRef) -> Result<Option<DateTime<Utc>>> {
            match self {
                Target::Absent => Err(SyncError::Storage(format!("no such table: {}", t))),
                Target::Empty => Ok(None),
                Target::At(ts) => Ok(Some(*ts)),
            }
        }
        async fn prepare_table(&self, _t: &TableRef, _c: &[String]) -> Result<()> {
            unreachable!()
        }
        async fn clear_table(&self, _t: &TableRef) -> Result<u64> {
            unreachable!()
        }
        async fn insert_row(&self, _t: &TableRef, _c: &[String], _v: &[Option<String>]) -> Result<()> {
            unreachable!()
        }
        async fn row_count(&self, _t: &TableRef) -> Result<i64> {
            unreachable!()
        }
        async fn column_names(&self, _t: &TableRef) -> Result<Vec<String>> {
            unreachable!()
        }
        async fn null_count(&self, _t: &TableRef, _c: &str) -> Result<i64> {
            unreachable!()
        }
        async fn distinct_count(&self, _t: &TableRef, _c: &str) -> Result<i64> {
            unreachable!()
        }
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, day, 9, 30, 0).unwrap()
    }

    async fn evaluate(docs: Docs, target: Target) -> GateDecision {
        let gate = ChangeGate::new(Arc::new(docs), Arc::new(target));
        gate.evaluate(&SyncConfig::new("supplier_a", "main", "suppliers", "supplier_a.xlsx"))
            .await
    }

    #[tokio::test]
    async fn missing_source_file_stops_with_null_timestamps() {
        let d = evaluate(Docs::Missing, Target::At(ts(1))).await;
        assert!(!d.should_process);
        assert!(d.reason.contains("not found"));
        assert_eq!(d.file_last_updated, None);
        assert_eq!(d.table_last_updated, None);
    }

    #[tokio::test]
    async fn documents_failure_is_treated_as_nothing_to_do() {
        let d = evaluate(Docs::Broken, Target::Absent).await;
        assert!(!d.should_process);
        assert!(d.reason.contains("warehouse timed out"));
    }

    #[tokio::test]
    async fn absent_target_always_bootstraps() {
        for day in [1, 15, 30] {
            let d = evaluate(Docs::At(ts(day)), Target::Absent).await;
            assert!(d.should_process);
            assert!(d.reason.contains("initial load required"));
            assert_eq!(d.table_last_updated, None);
            assert_eq!(d.file_last_updated, Some(ts(day)));
        }
    }

    #[tokio::test]
    async fn empty_target_is_processed() {
        let d = evaluate(Docs::At(ts(2)), Target::Empty).await;
        assert!(d.should_process);
    }

    #[tokio::test]
    async fn newer_file_is_processed() {
        let d = evaluate(Docs::At(ts(3)), Target::At(ts(2))).await;
        assert!(d.should_process);
        assert_eq!(d.table_last_updated, Some(ts(2)));
    }

    #[tokio::test]
    async fn equal_timestamps_do_not_reprocess() {
        let d = evaluate(Docs::At(ts(2)), Target::At(ts(2))).await;
        assert!(!d.should_process);
        assert!(d.reason.contains("up to date"));
    }

    #[tokio::test]
    async fn older_file_is_skipped() {
        let d = evaluate(Docs::At(ts(1)), Target::At(ts(2))).await;
        assert!(!d.should_process);
    }
}
