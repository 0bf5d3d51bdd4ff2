//! Response handler: consumes worker output subjects.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::bus::{Headers, MessageHandler};
use crate::error::AppResult;
use crate::result_ext::ResultExt;
use crate::telemetry::TraceContext;

use super::context::EngineContext;
use super::messages::WorkerResponse;
use super::state::{Status, ERROR_OUTPUT};

pub struct ResponseHandler {
    ctx: Arc<EngineContext>,
}

impl ResponseHandler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn on_response(&self, response: &WorkerResponse, trace: &TraceContext) -> AppResult<()> {
        let ctx = &self.ctx;
        let execution_id = response.execution_id;

        let Some(mut execution) = ctx.repository.get_execution(execution_id).await? else {
            tracing::warn!(execution_id, "Execution not found, dropping response");
            return Ok(());
        };

        if execution.state.status != Status::Executing {
            tracing::warn!(
                execution_id,
                status = %execution.state.status,
                "Execution not executing, dropping response"
            );
            return Ok(());
        }

        if let Some(error) = response.outputs.get(ERROR_OUTPUT) {
            tracing::warn!(execution_id, step = %execution.state.step, error = %error, "Worker reported failure");
            return ctx.fail(&mut execution.state, error.clone()).await;
        }

        let current = execution.state.step.clone();
        if execution.step(&current).is_none() {
            tracing::error!(execution_id, step = %current, "Active step is not declared");
            return ctx
                .fail(&mut execution.state, format!("Step {} is not found", current))
                .await;
        }
        let next = execution.step_after(&current).cloned();

        let state = &mut execution.state;
        for (key, value) in &response.outputs {
            state.push_output(format!("{}.{}", current, key), value.clone());
        }

        let Some(next) = next else {
            state.transition(Status::Success)?;
            ctx.save_state(state).await?;
            tracing::info!(execution_id, step = %current, "Workflow finished");
            return Ok(());
        };

        state.step = next.name.clone();
        state.transition(Status::Pending)?;
        ctx.save_state(state).await?;
        tracing::debug!(execution_id, from = %current, to = %next.name, "Advanced to next step");

        if let Err(e) = ctx
            .enqueue_step(execution_id, &next, trace)
            .await
            .log("enqueueing next step")
        {
            ctx.fail(state, e.to_string()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ResponseHandler {
    fn name(&self) -> &'static str {
        "response_handler"
    }

    async fn handle(&self, headers: &Headers, payload: &[u8]) -> AppResult<()> {
        let response: WorkerResponse = serde_json::from_slice(payload)?;
        let trace = self.ctx.telemetry.extract(headers);
        let span = self.ctx.telemetry.span(self.name(), &trace);
        span.record("execution_id", response.execution_id);
        self.on_response(&response, &trace).instrument(span).await
    }
}
