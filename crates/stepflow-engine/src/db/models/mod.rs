//! Database models for the stepflow engine.

pub mod execution;

pub use execution::ExecutionRecord;
