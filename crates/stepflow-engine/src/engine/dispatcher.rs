//! Step dispatcher: consumes the steps subject.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::bus::{Headers, MessageHandler};
use crate::error::AppResult;
use crate::result_ext::ResultExt;
use crate::telemetry::TraceContext;

use super::context::EngineContext;
use super::messages::{DispatchMessage, StepMessage};
use super::native;
use super::resolver::resolve_inputs;
use super::state::{Status, NATIVE_SERVICE};

pub struct StepDispatcher {
    ctx: Arc<EngineContext>,
}

impl StepDispatcher {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, step: &StepMessage, trace: &TraceContext) -> AppResult<()> {
        let ctx = &self.ctx;

        let Some(mut execution) = ctx.repository.get_execution(step.execution_id).await? else {
            tracing::warn!(execution_id = step.execution_id, "Execution not found, dropping step");
            return Ok(());
        };
        let state = &mut execution.state;

        if state.status != Status::Pending {
            tracing::warn!(
                execution_id = step.execution_id,
                step = %step.name,
                status = %state.status,
                "Execution not pending, dropping step"
            );
            return Ok(());
        }
        if state.step != step.name {
            tracing::warn!(
                execution_id = step.execution_id,
                step = %step.name,
                current = %state.step,
                "Step is not the active step, dropping"
            );
            return Ok(());
        }

        let resolved = match resolve_inputs(state, &step.input) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(execution_id = step.execution_id, step = %step.name, error = %e, "Input resolution failed");
                return ctx.fail(state, e.to_string()).await;
            }
        };
        if !resolved.literal_fallbacks.is_empty() {
            tracing::debug!(
                execution_id = step.execution_id,
                step = %step.name,
                inputs = ?resolved.literal_fallbacks,
                "Inputs used as literals"
            );
        }

        if step.service == NATIVE_SERVICE {
            return native::execute(ctx, &mut execution, &step.task, &resolved.values, trace).await;
        }

        let Some(endpoint) = ctx.services.get(&step.service) else {
            tracing::error!(
                execution_id = step.execution_id,
                service = %step.service,
                "Service not registered, execution left pending"
            );
            return Ok(());
        };

        // The step must be EXECUTING before its dispatch message is visible.
        state.transition(Status::Executing)?;
        ctx.save_state(state).await?;

        let message = DispatchMessage {
            execution_id: step.execution_id,
            task_name: step.task.clone(),
            inputs: resolved.values,
        };
        match ctx
            .publish_dispatch(&endpoint.input_subject, &message, trace)
            .await
            .log("publishing dispatch message")
        {
            Ok(()) => {
                tracing::info!(
                    execution_id = step.execution_id,
                    step = %step.name,
                    service = %step.service,
                    task = %step.task,
                    "Step dispatched"
                );
                Ok(())
            }
            Err(e) => ctx.fail(state, e.to_string()).await,
        }
    }
}

#[async_trait]
impl MessageHandler for StepDispatcher {
    fn name(&self) -> &'static str {
        "step_dispatcher"
    }

    async fn handle(&self, headers: &Headers, payload: &[u8]) -> AppResult<()> {
        let step: StepMessage = serde_json::from_slice(payload)?;
        let trace = self.ctx.telemetry.extract(headers);
        let span = self.ctx.telemetry.span(self.name(), &trace);
        span.record("execution_id", step.execution_id);
        self.dispatch(&step, &trace).instrument(span).await
    }
}
