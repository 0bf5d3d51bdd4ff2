//! Collaborators shared by the message handlers.

use std::sync::Arc;

use crate::bus::{publish_json, BusError, MessageBus};
use crate::config::{ServiceRegistry, StateWriteMode};
use crate::error::AppResult;
use crate::repository::ExecutionRepository;
use crate::telemetry::{Telemetry, TraceContext};

use super::messages::{DispatchMessage, StepMessage};
use super::state::{State, Step};
use super::value::Value;

#[derive(Clone)]
pub struct EngineContext {
    pub repository: Arc<dyn ExecutionRepository>,
    pub bus: Arc<dyn MessageBus>,
    pub services: Arc<ServiceRegistry>,
    pub telemetry: Telemetry,
    /// Internal subject of steps ready for dispatch.
    pub steps_subject: String,
    pub write_mode: StateWriteMode,
}

impl EngineContext {
    pub async fn save_state(&self, state: &mut State) -> AppResult<()> {
        self.repository.update_state(state, self.write_mode).await
    }

    /// Queue `step` of execution `execution_id` for dispatch.
    pub async fn enqueue_step(
        &self,
        execution_id: i64,
        step: &Step,
        trace: &TraceContext,
    ) -> Result<(), BusError> {
        let message = StepMessage::new(execution_id, step);
        let headers = self.telemetry.inject(trace);
        publish_json(self.bus.as_ref(), &self.steps_subject, &headers, &message).await?;

        tracing::debug!(execution_id, step = %step.name, "Step enqueued");
        Ok(())
    }

    /// Publish a task invocation to a worker service.
    pub async fn publish_dispatch(
        &self,
        subject: &str,
        message: &DispatchMessage,
        trace: &TraceContext,
    ) -> Result<(), BusError> {
        let headers = self.telemetry.inject(trace);
        publish_json(self.bus.as_ref(), subject, &headers, message).await
    }

    /// Record a failure and persist it.
    pub async fn fail(&self, state: &mut State, error: impl Into<Value>) -> AppResult<()> {
        state.fail(error)?;
        self.save_state(state).await
    }
}
