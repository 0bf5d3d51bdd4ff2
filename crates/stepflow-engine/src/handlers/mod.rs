//! HTTP handlers, organized by domain.

pub mod executions;
pub mod health;

pub use health::{api_health, health_check};
