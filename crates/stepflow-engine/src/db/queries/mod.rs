//! Database queries for the stepflow engine.
//!
//! Queries are free functions over the pool, grouped by table.

pub mod execution;
pub mod lease;
