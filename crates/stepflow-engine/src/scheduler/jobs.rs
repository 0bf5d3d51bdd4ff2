//! Cron and one-shot jobs gated by leader election.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::elector::LeaderElector;

/// Errors raised when registering a job.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Job {0} is already scheduled")]
    DuplicateJob(Uuid),
}

/// Immutable description of one firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiringContext {
    pub job_id: Uuid,
    /// Zero-based tick number, counting ticks skipped by non-leaders.
    pub sequence: u64,
    pub first_firing: bool,
    pub scheduled_at: DateTime<Utc>,
}

pub type JobCallback = Arc<dyn Fn(FiringContext) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Executed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

/// Parse a cron expression.
///
/// Five fields are minute precision and get a leading `0` seconds field;
/// six or seven fields are passed through.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, ScheduleError> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// The firing side of a job: runs the callback when this replica leads.
pub struct JobTrigger {
    job_id: Uuid,
    callback: JobCallback,
    elector: Arc<dyn LeaderElector>,
    sequence: AtomicU64,
}

impl JobTrigger {
    pub fn new(job_id: Uuid, callback: JobCallback, elector: Arc<dyn LeaderElector>) -> Self {
        Self {
            job_id,
            callback,
            elector,
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn fire(&self, scheduled_at: DateTime<Utc>) -> FireOutcome {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        if !self.elector.is_leader().await {
            tracing::debug!(job_id = %self.job_id, sequence, "Not the leader, skipping firing");
            return FireOutcome::Skipped;
        }

        let ctx = FiringContext {
            job_id: self.job_id,
            sequence,
            first_firing: sequence == 0,
            scheduled_at,
        };
        tracing::info!(job_id = %self.job_id, sequence, scheduled_at = %scheduled_at, "Firing job");
        (self.callback)(ctx).await;
        FireOutcome::Executed
    }
}

type JobTable = Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>;

/// Registry of running jobs keyed by job ID.
pub struct JobScheduler {
    elector: Arc<dyn LeaderElector>,
    jobs: JobTable,
}

impl JobScheduler {
    pub fn new(elector: Arc<dyn LeaderElector>) -> Self {
        Self {
            elector,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a recurring job. Times are evaluated in UTC.
    ///
    /// Each firing runs on its own task: cancelling stops future firings but
    /// never interrupts one in progress.
    pub fn create_cron_job(
        &self,
        expr: &str,
        callback: JobCallback,
        job_id: Uuid,
    ) -> Result<(), ScheduleError> {
        let schedule = parse_cron(expr)?;
        let trigger = Arc::new(JobTrigger::new(job_id, callback, Arc::clone(&self.elector)));

        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job_id) {
            return Err(ScheduleError::DuplicateJob(job_id));
        }

        let handle = tokio::spawn(async move {
            let mut last: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                let after = last.map_or(now, |l| l.max(now));
                let Some(next) = schedule.after(&after).next() else {
                    tracing::info!(job_id = %job_id, "Cron job has no further firings");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                let firing = Arc::clone(&trigger);
                tokio::spawn(async move {
                    firing.fire(next).await;
                });
                last = Some(next);
            }
        });
        jobs.insert(job_id, handle);

        tracing::info!(job_id = %job_id, cron = %expr, "Cron job scheduled");
        Ok(())
    }

    /// Register a one-shot job firing after `delay_secs`.
    ///
    /// The job leaves the table before its callback runs, so a cancel either
    /// prevents the firing or finds nothing to cancel.
    pub fn create_delayed_job(
        &self,
        delay_secs: u64,
        callback: JobCallback,
        job_id: Uuid,
    ) -> Result<(), ScheduleError> {
        let trigger = JobTrigger::new(job_id, callback, Arc::clone(&self.elector));
        let table = Arc::clone(&self.jobs);

        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job_id) {
            return Err(ScheduleError::DuplicateJob(job_id));
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            lock(&table).remove(&job_id);
            trigger.fire(Utc::now()).await;
        });
        jobs.insert(job_id, handle);

        tracing::info!(job_id = %job_id, delay_secs, "Delayed job scheduled");
        Ok(())
    }

    /// Stop a job. Unknown IDs are reported, not treated as errors.
    pub fn cancel_job(&self, job_id: Uuid) -> CancelOutcome {
        match lock(&self.jobs).remove(&job_id) {
            Some(handle) => {
                handle.abort();
                tracing::info!(job_id = %job_id, "Job cancelled");
                CancelOutcome::Cancelled
            }
            None => CancelOutcome::NotFound,
        }
    }

    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }

    /// Abort every job.
    pub fn shutdown(&self) {
        let mut jobs = lock(&self.jobs);
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }
}

fn lock(table: &JobTable) -> MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::StandaloneElector;
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    /// Elector whose leadership is decided by a token shared across replicas.
    struct TokenElector {
        replica: usize,
        token: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LeaderElector for TokenElector {
        async fn is_leader(&self) -> bool {
            self.token.load(Ordering::SeqCst) == self.replica
        }
    }

    fn recording_callback(fired: Arc<Mutex<Vec<FiringContext>>>) -> JobCallback {
        Arc::new(move |ctx: FiringContext| {
            let fired = Arc::clone(&fired);
            async move {
                fired.lock().unwrap().push(ctx);
            }
            .boxed()
        })
    }

    #[test]
    fn test_parse_cron_field_counts() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("*/10 * * * * *").is_ok());
        assert!(parse_cron("0 0 12 * * Mon 2030").is_ok());
        assert!(matches!(
            parse_cron("not a cron"),
            Err(ScheduleError::InvalidCron { .. })
        ));
    }

    #[tokio::test]
    async fn test_alternating_leaders_fire_exactly_once_per_tick() {
        let job_id = Uuid::new_v4();
        let token = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(Mutex::new(Vec::new()));

        let replicas: Vec<JobTrigger> = (0..2)
            .map(|replica| {
                JobTrigger::new(
                    job_id,
                    recording_callback(Arc::clone(&fired)),
                    Arc::new(TokenElector {
                        replica,
                        token: Arc::clone(&token),
                    }),
                )
            })
            .collect();

        for tick in 0..6 {
            token.store(tick % 2, Ordering::SeqCst);
            let outcomes = [
                replicas[0].fire(Utc::now()).await,
                replicas[1].fire(Utc::now()).await,
            ];
            let executed = outcomes
                .iter()
                .filter(|o| **o == FireOutcome::Executed)
                .count();
            assert_eq!(executed, 1, "tick {}", tick);
        }

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 6);
        let sequences: Vec<u64> = fired.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(fired.iter().filter(|c| c.first_firing).count(), 1);
        assert!(fired[0].first_firing);
        assert!(fired.iter().all(|c| c.job_id == job_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_fires_once_and_deregisters() {
        let scheduler = JobScheduler::new(Arc::new(StandaloneElector));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let job_id = Uuid::new_v4();

        scheduler
            .create_delayed_job(5, recording_callback(Arc::clone(&fired)), job_id)
            .unwrap();
        assert_eq!(scheduler.job_count(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert!(fired[0].first_firing);
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_delayed_job_never_fires() {
        let scheduler = JobScheduler::new(Arc::new(StandaloneElector));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let job_id = Uuid::new_v4();

        scheduler
            .create_delayed_job(5, recording_callback(Arc::clone(&fired)), job_id)
            .unwrap();
        assert_eq!(scheduler.cancel_job(job_id), CancelOutcome::Cancelled);
        assert_eq!(scheduler.cancel_job(job_id), CancelOutcome::NotFound);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delayed_firing_is_noop() {
        let scheduler = JobScheduler::new(Arc::new(StandaloneElector));
        let job_id = Uuid::new_v4();
        let release = Arc::new(tokio::sync::Notify::new());
        let completed = Arc::new(AtomicUsize::new(0));

        let callback: JobCallback = {
            let release = Arc::clone(&release);
            let completed = Arc::clone(&completed);
            Arc::new(move |_: FiringContext| {
                let release = Arc::clone(&release);
                let completed = Arc::clone(&completed);
                async move {
                    release.notified().await;
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };
        scheduler.create_delayed_job(5, callback, job_id).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(scheduler.job_count(), 0);
        assert_eq!(scheduler.cancel_job(job_id), CancelOutcome::NotFound);

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cron_job_registration() {
        let scheduler = JobScheduler::new(Arc::new(StandaloneElector));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let job_id = Uuid::new_v4();

        scheduler
            .create_cron_job("0 0 * * *", recording_callback(Arc::clone(&fired)), job_id)
            .unwrap();
        assert!(matches!(
            scheduler.create_cron_job("0 0 * * *", recording_callback(Arc::clone(&fired)), job_id),
            Err(ScheduleError::DuplicateJob(id)) if id == job_id
        ));
        assert!(scheduler
            .create_cron_job("bogus", recording_callback(fired), Uuid::new_v4())
            .is_err());

        assert_eq!(scheduler.job_count(), 1);
        assert_eq!(scheduler.cancel_job(job_id), CancelOutcome::Cancelled);
        assert_eq!(scheduler.job_count(), 0);
    }
}
