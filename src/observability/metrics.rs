//! Metrics for the sync pipeline
//!
//! Each stage records through the helper modules below so metric names live
//! in one place and follow Prometheus naming conventions.

use once_cell::sync::OnceCell;
use std::fmt;
use tracing::info;

/// All metric names used by the sync pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Gate metrics
    GateDecisions,

    // Materialize metrics
    MaterializeRowsInserted,
    MaterializeRowsFailed,
    MaterializeErrors,

    // Audit metrics
    AuditChecks,
    AuditTableUnreachable,

    // Run metrics
    RunsCompleted,
    RunDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::GateDecisions => "excel_sync_gate_decisions_total",
            MetricName::MaterializeRowsInserted => "excel_sync_materialize_rows_inserted_total",
            MetricName::MaterializeRowsFailed => "excel_sync_materialize_rows_failed_total",
            MetricName::MaterializeErrors => "excel_sync_materialize_errors_total",
            MetricName::AuditChecks => "excel_sync_audit_checks_total",
            MetricName::AuditTableUnreachable => "excel_sync_audit_table_unreachable_total",
            MetricName::RunsCompleted => "excel_sync_runs_completed_total",
            MetricName::RunDuration => "excel_sync_run_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceCell<metrics_exporter_prometheus::PrometheusHandle> = OnceCell::new();

/// Installs the Prometheus recorder. Calling it again is a no-op.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    let _ = METRICS_HANDLE.set(handle);
    info!("Metrics system initialized");
    Ok(())
}

/// Current metrics in Prometheus text format, if the recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

pub mod gate {
    use super::MetricName;

    pub fn decision(should_process: bool) {
        let outcome = if should_process { "process" } else { "skip" };
        ::metrics::counter!(MetricName::GateDecisions.as_str(), "outcome" => outcome).increment(1);
    }
}

pub mod materialize {
    use super::MetricName;

    pub fn rows_inserted(count: u64) {
        ::metrics::counter!(MetricName::MaterializeRowsInserted.as_str()).increment(count);
    }

    pub fn rows_failed(count: u64) {
        ::metrics::counter!(MetricName::MaterializeRowsFailed.as_str()).increment(count);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::MaterializeErrors.as_str()).increment(1);
    }
}

pub mod audit {
    use super::MetricName;

    pub fn check_result(check: &'static str, passed: bool) {
        let result = if passed { "passed" } else { "failed" };
        ::metrics::counter!(MetricName::AuditChecks.as_str(), "check" => check, "result" => result)
            .increment(1);
    }

    pub fn table_unreachable() {
        ::metrics::counter!(MetricName::AuditTableUnreachable.as_str()).increment(1);
    }
}

pub mod runs {
    use super::MetricName;

    pub fn completed(status: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::RunsCompleted.as_str(), "status" => status).increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str(), "status" => status).record(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_and_unique() {
        let all = [
            MetricName::GateDecisions,
            MetricName::MaterializeRowsInserted,
            MetricName::MaterializeRowsFailed,
            MetricName::MaterializeErrors,
            MetricName::AuditChecks,
            MetricName::AuditTableUnreachable,
            MetricName::RunsCompleted,
            MetricName::RunDuration,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), all.len());
        assert!(names.iter().all(|n| n.starts_with("excel_sync_")));
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        gate::decision(true);
        materialize::rows_inserted(3);
        audit::check_result("row_count", false);
        runs::completed("skipped", 0.01);
    }
}
