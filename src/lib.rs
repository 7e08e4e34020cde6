pub mod config;
pub mod constants;
pub mod error;

// Layered boundaries: domain shapes, application ports and use cases,
// pipeline stages, and infrastructure adapters
pub mod app;
pub mod domain;
pub mod infra;
pub mod pipeline;

pub mod observability;

pub use error::{Result, SyncError};
