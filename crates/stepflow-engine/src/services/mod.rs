//! Service layer.
//!
//! Services hold the logic behind the HTTP handlers.

pub mod execution;

pub use execution::{CancelSummary, ExecutionService};
