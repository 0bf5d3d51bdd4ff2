//! Leader election for scheduled jobs.
//!
//! Every replica registers the same scheduled jobs; only the replica holding
//! the lease runs a firing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::db::queries::lease;
use crate::db::DbPool;

#[async_trait]
pub trait LeaderElector: Send + Sync {
    async fn is_leader(&self) -> bool;
}

/// Elector for single-replica deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneElector;

#[async_trait]
impl LeaderElector for StandaloneElector {
    async fn is_leader(&self) -> bool {
        true
    }
}

/// Lease-based elector backed by the `leader_lease` table.
///
/// The campaign loop acquires or renews the lease every `renew_interval`.
/// Leadership is lost when a renewal fails, and another replica takes over
/// once the lease has expired.
pub struct PgLeaseElector {
    pool: DbPool,
    election: String,
    holder: String,
    lease_ttl: Duration,
    renew_interval: Duration,
    leader: AtomicBool,
}

impl PgLeaseElector {
    pub fn new(
        pool: DbPool,
        election: impl Into<String>,
        holder: impl Into<String>,
        lease_ttl: Duration,
        renew_interval: Duration,
    ) -> Self {
        Self {
            pool,
            election: election.into(),
            holder: holder.into(),
            lease_ttl,
            renew_interval,
            leader: AtomicBool::new(false),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// One acquire/renew attempt. Returns whether this replica now leads.
    pub async fn campaign_once(&self) -> bool {
        let won = match lease::try_acquire_lease(
            &self.pool,
            &self.election,
            &self.holder,
            self.lease_ttl.as_secs(),
        )
        .await
        {
            Ok(won) => won,
            Err(e) => {
                tracing::warn!(error = %e, election = %self.election, "Lease renewal failed");
                false
            }
        };

        let was_leader = self.leader.swap(won, Ordering::SeqCst);
        if won && !was_leader {
            tracing::info!(election = %self.election, holder = %self.holder, "Became scheduler leader");
        } else if !won && was_leader {
            tracing::warn!(election = %self.election, holder = %self.holder, "Lost scheduler leadership");
        }
        won
    }

    /// Start the background campaign loop.
    pub fn start_campaign(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let elector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(elector.renew_interval);
            loop {
                ticker.tick().await;
                elector.campaign_once().await;
            }
        })
    }

    /// Give up the lease so another replica can take over immediately.
    pub async fn resign(&self) {
        self.leader.store(false, Ordering::SeqCst);
        if let Err(e) = lease::release_lease(&self.pool, &self.election, &self.holder).await {
            tracing::warn!(error = %e, election = %self.election, "Failed to release lease");
        } else {
            tracing::info!(election = %self.election, holder = %self.holder, "Resigned scheduler leadership");
        }
    }
}

#[async_trait]
impl LeaderElector for PgLeaseElector {
    async fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

/// Identity used as lease holder: `<hostname>-<random suffix>`.
pub fn replica_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_standalone_is_always_leader() {
        assert!(StandaloneElector.is_leader().await);
    }

    #[test]
    fn test_replica_identities_are_unique() {
        assert_ne!(replica_identity(), replica_identity());
    }
}
