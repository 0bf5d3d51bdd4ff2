//! Message bus abstraction.
//!
//! Handlers publish through [`MessageBus`] and are driven by a consumer
//! through [`MessageHandler`], so the engine runs unchanged against NATS
//! JetStream or the in-memory bus used by tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::error::AppResult;

/// Message headers (trace context and the like).
pub type Headers = BTreeMap<String, String>;

/// Errors that can occur talking to the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("JetStream error: {0}")]
    JetStream(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Consume error: {0}")]
    Consume(String),
}

/// Producer side of the bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `subject` and wait until the broker accepted it.
    async fn publish(&self, subject: &str, headers: &Headers, payload: Vec<u8>)
        -> Result<(), BusError>;
}

/// Serialize `message` as JSON and publish it.
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn MessageBus,
    subject: &str,
    headers: &Headers,
    message: &T,
) -> Result<(), BusError> {
    let payload = serde_json::to_vec(message)
        .map_err(|e| BusError::Publish(format!("Serialization error: {}", e)))?;
    bus.publish(subject, headers, payload).await
}

/// Consumer side: one handler per subject.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name used in spans and logs.
    fn name(&self) -> &'static str;

    /// Handle one message. Errors are logged by the consumer and the message
    /// is acknowledged anyway.
    async fn handle(&self, headers: &Headers, payload: &[u8]) -> AppResult<()>;
}
