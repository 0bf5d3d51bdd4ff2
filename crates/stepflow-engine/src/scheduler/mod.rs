//! Leader-elected job scheduler for cron and delayed submissions.

pub mod elector;
pub mod jobs;

pub use elector::{replica_identity, LeaderElector, PgLeaseElector, StandaloneElector};
pub use jobs::{
    parse_cron, CancelOutcome, FireOutcome, FiringContext, JobCallback, JobScheduler, JobTrigger,
    ScheduleError,
};
