use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{ConfigStorePort, DocumentStorePort, TableStorePort, WorkbookReaderPort};
use crate::domain::SyncConfig;
use crate::error::{Result, SyncError};
use crate::observability::metrics;
use crate::pipeline::processing::change_gate::{ChangeGate, GateDecision};
use crate::pipeline::processing::materialize::layout::LayoutProfile;
use crate::pipeline::processing::materialize::{ParseResult, TableMaterializer};
use crate::pipeline::processing::quality_gate::{QualityAuditor, QualityReport};

/// Terminal state of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Skipped,
    Success,
    DqFailed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Skipped => "skipped",
            RunStatus::Success => "success",
            RunStatus::DqFailed => "dq_failed",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub gate: GateDecision,
    pub parse: Option<ParseResult>,
    pub dq: Option<QualityReport>,
}

/// Sequences gate -> materialize -> audit for one sync config.
///
/// Runs writing the same target table are serialized, whatever config id
/// they came from: a second trigger waits for the first to commit and then
/// re-evaluates the gate from scratch. Runs on different targets do not
/// block each other. Across processes the store's own write transaction
/// keeps each replacement whole.
pub struct SyncOrchestrator {
    gate: ChangeGate,
    materializer: TableMaterializer,
    auditor: QualityAuditor,
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(gate: ChangeGate, materializer: TableMaterializer, auditor: QualityAuditor) -> Self {
        Self {
            gate,
            materializer,
            auditor,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wires all three stages onto the same stores.
    pub fn from_ports(
        documents: Arc<dyn DocumentStorePort>,
        tables: Arc<dyn TableStorePort>,
        reader: Arc<dyn WorkbookReaderPort>,
        layout: LayoutProfile,
        required_columns: Vec<String>,
    ) -> Self {
        Self::new(
            ChangeGate::new(documents.clone(), tables.clone()),
            TableMaterializer::new(documents, tables.clone(), reader, layout),
            QualityAuditor::with_required_columns(tables, required_columns),
        )
    }

    pub fn gate(&self) -> &ChangeGate {
        &self.gate
    }

    pub fn materializer(&self) -> &TableMaterializer {
        &self.materializer
    }

    pub fn auditor(&self) -> &QualityAuditor {
        &self.auditor
    }

    /// Runs one sync. Never fails: every stage outcome maps onto a status.
    pub async fn run(&self, config: &SyncConfig) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_run", config_id = %config.id, run_id = %run_id);
        async move {
            let key = lock_key(config);
            let lock = self.lock_for(&key).await;
            let result = {
                let _guard = lock.lock().await;
                let started = Instant::now();
                let result = self.run_stages(run_id, config).await;
                metrics::runs::completed(result.status.as_str(), started.elapsed().as_secs_f64());
                result
            };
            drop(lock);
            self.release_lock(&key).await;
            info!("Run finished with status {}", result.status.as_str());
            result
        }
        .instrument(span)
        .await
    }

    /// Resolves a persisted config and runs it. Unknown ids are the only error.
    pub async fn run_by_id(&self, configs: &dyn ConfigStorePort, config_id: &str) -> Result<RunResult> {
        let config = configs
            .get(config_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("configuration '{}'", config_id)))?;
        Ok(self.run(&config).await)
    }

    async fn run_stages(&self, run_id: Uuid, config: &SyncConfig) -> RunResult {
        let gate = self.gate.evaluate(config).await;
        if !gate.should_process {
            info!("Skipping {}: {}", config.file_name, gate.reason);
            return RunResult {
                run_id,
                status: RunStatus::Skipped,
                gate,
                parse: None,
                dq: None,
            };
        }
        info!("Processing {}: {}", config.file_name, gate.reason);

        let parse = self.materializer.materialize(config).await;
        if !parse.is_success() {
            warn!("Materialization failed: {}", parse.message);
            return RunResult {
                run_id,
                status: RunStatus::Error,
                gate,
                parse: Some(parse),
                dq: None,
            };
        }

        // Rows are committed at this point whatever the audit says.
        let dq = self.auditor.audit(config).await;
        let status = if dq.checks_passed {
            RunStatus::Success
        } else {
            warn!(
                "Data quality failed: {} of {} checks failed",
                dq.failed_checks, dq.total_checks
            );
            RunStatus::DqFailed
        };

        RunResult {
            run_id,
            status,
            gate,
            parse: Some(parse),
            dq: Some(dq),
        }
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the entry once no run holds or waits on it.
    async fn release_lock(&self, key: &str) {
        let mut locks = self.run_locks.lock().await;
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn held_locks(&self) -> usize {
        self.run_locks.lock().await.len()
    }
}

/// Runs are keyed by the table they write. A config whose target does not
/// validate never reaches the writer, so its id is enough.
fn lock_key(config: &SyncConfig) -> String {
    config
        .target_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|_| config.id.clone())
}
