//! Database module for the stepflow engine.
//!
//! This module provides database connectivity, the schema bootstrap, row
//! models, and queries for PostgreSQL using SQLx.

pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;

pub use pool::{create_pool, health_check, DbPool};
pub use schema::ensure_schema;
