// Sync pipeline: change detection, materialization, and quality audit

pub mod processing;

pub use processing::change_gate::{ChangeGate, GateDecision};
pub use processing::materialize::{ParseResult, ParseStatus, TableMaterializer};
pub use processing::quality_gate::{QualityAuditor, QualityReport};
