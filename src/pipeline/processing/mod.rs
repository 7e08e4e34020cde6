// Pipeline stages, in run order

pub mod change_gate;
pub mod materialize;
pub mod quality_gate;
