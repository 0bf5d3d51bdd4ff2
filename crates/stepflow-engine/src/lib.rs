//! Stepflow engine library.
//!
//! Drives submitted workflows step by step:
//!
//! - **Submission**: persists an execution, or registers a cron/delayed job
//! - **Dispatch**: resolves step inputs and publishes work to the owning service
//! - **Responses**: merges worker outputs and advances to the next step
//! - **Scheduling**: leader-elected cron and delayed jobs
//!
//! ## Architecture
//!
//! Execution state lives in PostgreSQL. NATS JetStream carries submissions,
//! the internal step queue and the per-service input/output subjects. Every
//! handler is stateless; replicas coordinate only through the database.
//!
//! ## Modules
//!
//! - [`config`]: configuration from environment variables and the service registry
//! - [`engine`]: message handlers and the workflow state machine
//! - [`repository`]: execution store
//! - [`scheduler`]: leader election and job scheduling
//! - [`nats`]: JetStream publisher and consumers
//! - [`handlers`]: HTTP route handlers

pub mod bus;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod nats;
pub mod repository;
pub mod result_ext;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod telemetry;

#[cfg(test)]
pub mod testing;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
