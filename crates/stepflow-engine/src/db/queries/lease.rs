//! Leader lease queries.

use crate::db::DbPool;
use crate::error::AppResult;

/// Acquire or renew the lease of `election` for `holder`.
///
/// Succeeds when no lease exists, the lease is already held by `holder`, or
/// the current lease has expired.
pub async fn try_acquire_lease(
    pool: &DbPool,
    election: &str,
    holder: &str,
    ttl_secs: u64,
) -> AppResult<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        INSERT INTO leader_lease (election, holder, expires_at)
        VALUES ($1, $2, now() + make_interval(secs => $3))
        ON CONFLICT (election) DO UPDATE
        SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
        WHERE leader_lease.holder = EXCLUDED.holder OR leader_lease.expires_at < now()
        RETURNING holder
        "#,
    )
    .bind(election)
    .bind(holder)
    .bind(ttl_secs as f64)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Drop the lease if `holder` still owns it.
pub async fn release_lease(pool: &DbPool, election: &str, holder: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM leader_lease WHERE election = $1 AND holder = $2")
        .bind(election)
        .bind(holder)
        .execute(pool)
        .await?;

    Ok(())
}
