//! Execution query and cancellation service.
//!
//! Cancelling an execution moves a live state to `CANCELLED` and
//! deregisters the scheduled job keyed by the execution's job ID, so a
//! cancelled cron submission stops firing. Work already handed to a worker
//! is not interrupted; its late response is dropped by the response handler.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StateWriteMode;
use crate::engine::messages::ExecutionStateResponse;
use crate::engine::state::{Execution, Status};
use crate::error::{AppError, AppResult};
use crate::repository::ExecutionRepository;
use crate::scheduler::{CancelOutcome, JobScheduler};

const CANCEL_ATTEMPTS: usize = 3;

/// Outcome of a cancel request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSummary {
    /// UUIDs of executions moved to `CANCELLED`.
    pub cancelled: Vec<Uuid>,
    /// Scheduled jobs that were deregistered.
    pub jobs_cancelled: Vec<Uuid>,
}

#[derive(Clone)]
pub struct ExecutionService {
    repository: Arc<dyn ExecutionRepository>,
    scheduler: Arc<JobScheduler>,
    write_mode: StateWriteMode,
}

impl ExecutionService {
    pub fn new(
        repository: Arc<dyn ExecutionRepository>,
        scheduler: Arc<JobScheduler>,
        write_mode: StateWriteMode,
    ) -> Self {
        Self {
            repository,
            scheduler,
            write_mode,
        }
    }

    /// Current state of the execution identified by `uuid`.
    pub async fn get_by_uuid(&self, uuid: Uuid) -> AppResult<ExecutionStateResponse> {
        let execution = self
            .repository
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution not found: {}", uuid)))?;

        let state = execution.state;
        Ok(ExecutionStateResponse {
            outputs: state.outputs_map(),
            status: state.status.to_string(),
            step: state.step,
        })
    }

    /// Cancel one execution and the job registered under its UUID.
    ///
    /// A submission that is still waiting on its delay has no execution yet;
    /// deregistering its job is enough.
    pub async fn cancel_by_uuid(&self, uuid: Uuid) -> AppResult<CancelSummary> {
        let mut summary = CancelSummary::default();
        let execution = self.repository.find_by_uuid(uuid).await?;

        let mut job_ids = BTreeSet::from([uuid]);
        if let Some(execution) = execution {
            job_ids.extend(execution.job_id);
            if self.cancel_execution(execution.id).await? {
                summary.cancelled.push(execution.uuid);
            }
        }
        self.cancel_jobs(job_ids, &mut summary);

        if summary.cancelled.is_empty() && summary.jobs_cancelled.is_empty() {
            tracing::debug!(execution_uuid = %uuid, "Nothing to cancel");
        }
        Ok(summary)
    }

    /// Cancel every execution carrying at least one of `tags`.
    pub async fn cancel_by_tags(&self, tags: &[String]) -> AppResult<CancelSummary> {
        if tags.is_empty() {
            return Err(AppError::BadRequest("tags must not be empty".to_string()));
        }

        let mut summary = CancelSummary::default();
        let mut job_ids = BTreeSet::new();
        for execution in self.repository.find_by_tags(tags).await? {
            job_ids.extend(execution.job_id);
            if self.cancel_execution(execution.id).await? {
                summary.cancelled.push(execution.uuid);
            }
        }
        self.cancel_jobs(job_ids, &mut summary);

        tracing::info!(
            tags = ?tags,
            executions = summary.cancelled.len(),
            jobs = summary.jobs_cancelled.len(),
            "Cancelled by tags"
        );
        Ok(summary)
    }

    /// Move a live execution to `CANCELLED`. Returns false when it had
    /// already finished.
    async fn cancel_execution(&self, id: i64) -> AppResult<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(Execution { mut state, .. }) = self.repository.get_execution(id).await? else {
                return Ok(false);
            };
            if state.status.is_terminal() {
                return Ok(false);
            }
            state.transition(Status::Cancelled)?;

            match self.repository.update_state(&mut state, self.write_mode).await {
                Ok(()) => {
                    tracing::info!(execution_id = id, step = %state.step, "Execution cancelled");
                    return Ok(true);
                }
                Err(AppError::StaleState { .. }) if attempt < CANCEL_ATTEMPTS => {
                    tracing::debug!(execution_id = id, attempt, "State moved during cancel, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn cancel_jobs(&self, job_ids: BTreeSet<Uuid>, summary: &mut CancelSummary) {
        for job_id in job_ids {
            if self.scheduler.cancel_job(job_id) == CancelOutcome::Cancelled {
                summary.jobs_cancelled.push(job_id);
            }
        }
    }
}
