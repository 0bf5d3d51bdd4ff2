//! Configuration module for the stepflow engine.
//!
//! Settings are loaded from environment variables with `envy`; the worker
//! service registry is a YAML file referenced from the app config.

mod app;
mod database;
mod services;

pub use app::{AppConfig, ElectionMode, StateWriteMode};
pub use database::DatabaseConfig;
pub use services::{ServiceEndpoint, ServiceRegistry};
