//! Submission handler: consumes the submissions subject.
//!
//! A submission either starts an execution right away or registers a cron or
//! delayed job keyed by the submission UUID. Each firing of such a job
//! creates a fresh execution whose job ID is the submission UUID; only the
//! first firing reuses the submission UUID for the execution itself.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::bus::{Headers, MessageHandler};
use crate::error::AppResult;
use crate::result_ext::ResultExt;
use crate::scheduler::{FiringContext, JobCallback, JobScheduler};
use crate::telemetry::TraceContext;

use super::context::EngineContext;
use super::messages::SubmissionMessage;
use super::state::{Parameters, Schedule};

pub struct SubmissionHandler {
    ctx: Arc<EngineContext>,
    scheduler: Arc<JobScheduler>,
}

impl SubmissionHandler {
    pub fn new(ctx: Arc<EngineContext>, scheduler: Arc<JobScheduler>) -> Self {
        Self { ctx, scheduler }
    }

    pub async fn on_submission(
        &self,
        submission: SubmissionMessage,
        trace: &TraceContext,
    ) -> AppResult<()> {
        let uuid = submission.execution_uuid;

        if submission.steps.is_empty() {
            tracing::warn!(execution_uuid = %uuid, "Submission has no steps, skipped");
            return Ok(());
        }
        if let Some(name) = submission.duplicate_step_name() {
            tracing::warn!(execution_uuid = %uuid, step = %name, "Submission declares step name twice, skipped");
            return Ok(());
        }

        let schedule = submission
            .parameters
            .clone()
            .map(Parameters::from)
            .and_then(|p| p.schedule());

        match schedule {
            None => start_execution(&self.ctx, &submission, uuid, None, trace).await,
            Some(Schedule::Cron(expr)) => {
                let callback = firing_callback(Arc::clone(&self.ctx), submission, trace.clone());
                self.scheduler.create_cron_job(&expr, callback, uuid)?;
                Ok(())
            }
            Some(Schedule::Delay(secs)) => {
                let callback = firing_callback(Arc::clone(&self.ctx), submission, trace.clone());
                self.scheduler.create_delayed_job(secs, callback, uuid)?;
                Ok(())
            }
        }
    }
}

/// Create the execution for `uuid` and enqueue its first step.
async fn start_execution(
    ctx: &EngineContext,
    submission: &SubmissionMessage,
    uuid: Uuid,
    job_id: Option<Uuid>,
    trace: &TraceContext,
) -> AppResult<()> {
    let Some(new) = submission.to_new_execution(uuid, job_id) else {
        return Ok(());
    };
    let first = new.first_step().clone();

    let mut execution = ctx.repository.create_execution(new).await?;
    tracing::info!(
        execution_id = execution.id,
        execution_uuid = %execution.uuid,
        workflow_id = execution.workflow_id,
        "Execution created"
    );

    if let Err(e) = ctx
        .enqueue_step(execution.id, &first, trace)
        .await
        .log("enqueueing first step")
    {
        ctx.fail(&mut execution.state, e.to_string()).await?;
    }
    Ok(())
}

fn firing_callback(
    ctx: Arc<EngineContext>,
    submission: SubmissionMessage,
    trace: TraceContext,
) -> JobCallback {
    let submission = Arc::new(submission);
    Arc::new(move |firing: FiringContext| {
        let ctx = Arc::clone(&ctx);
        let submission = Arc::clone(&submission);
        let trace = trace.child();
        async move {
            let uuid = if firing.first_firing {
                firing.job_id
            } else {
                Uuid::new_v4()
            };
            let span = ctx.telemetry.span("scheduled_submission", &trace);
            let _ = start_execution(&ctx, &submission, uuid, Some(firing.job_id), &trace)
                .instrument(span)
                .await
                .log(format!("starting execution for job {}", firing.job_id));
        }
        .boxed()
    })
}

#[async_trait]
impl MessageHandler for SubmissionHandler {
    fn name(&self) -> &'static str {
        "submission_handler"
    }

    async fn handle(&self, headers: &Headers, payload: &[u8]) -> AppResult<()> {
        let submission: SubmissionMessage = serde_json::from_slice(payload)?;
        let trace = self.ctx.telemetry.extract(headers);
        let span = self.ctx.telemetry.span(self.name(), &trace);
        self.on_submission(submission, &trace).instrument(span).await
    }
}
