//! Execution and execution state queries.

use chrono::Utc;
use sqlx::types::Json;
use uuid::Uuid;

use crate::db::models::ExecutionRecord;
use crate::db::DbPool;
use crate::engine::state::{NewExecution, State, Status};
use crate::error::AppResult;

const SELECT_EXECUTION: &str = r#"
    SELECT e.id, e.uuid, e.workflow_id, e.job_id, e.tags, e.parameters, e.steps, e.created_at,
           s.step, s.status, s.outputs, s.arguments, s.version
    FROM execution e
    JOIN execution_state s ON s.execution_id = e.id
"#;

/// Insert an execution and its initial `PENDING` state in one transaction.
///
/// Returns the store-assigned execution ID.
pub async fn insert_execution(pool: &DbPool, new: &NewExecution) -> AppResult<i64> {
    let mut tx = pool.begin().await?;

    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO execution (uuid, workflow_id, job_id, tags, parameters, steps, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(new.uuid)
    .bind(new.workflow_id)
    .bind(new.job_id)
    .bind(&new.tags)
    .bind(new.parameters.as_ref().map(Json))
    .bind(Json(&new.steps))
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO execution_state (execution_id, step, status, outputs, arguments, version, updated_at)
        VALUES ($1, $2, $3, '[]'::jsonb, $4, 0, $5)
        "#,
    )
    .bind(row.0)
    .bind(&new.first_step().name)
    .bind(Status::Pending.as_str())
    .bind(Json(&new.arguments))
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.0)
}

/// Get an execution with its state by ID.
pub async fn get_execution(pool: &DbPool, id: i64) -> AppResult<Option<ExecutionRecord>> {
    let record = sqlx::query_as::<_, ExecutionRecord>(&format!("{SELECT_EXECUTION} WHERE e.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// Get an execution with its state by client UUID.
pub async fn get_execution_by_uuid(
    pool: &DbPool,
    uuid: Uuid,
) -> AppResult<Option<ExecutionRecord>> {
    let record =
        sqlx::query_as::<_, ExecutionRecord>(&format!("{SELECT_EXECUTION} WHERE e.uuid = $1"))
            .bind(uuid)
            .fetch_optional(pool)
            .await?;

    Ok(record)
}

/// Executions carrying any of `tags`.
pub async fn get_executions_by_tags(
    pool: &DbPool,
    tags: &[String],
) -> AppResult<Vec<ExecutionRecord>> {
    let records = sqlx::query_as::<_, ExecutionRecord>(&format!(
        "{SELECT_EXECUTION} WHERE e.tags && $1 ORDER BY e.id"
    ))
    .bind(tags)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Overwrite the state row. Returns the new version, or `None` when the
/// execution does not exist.
pub async fn update_state(pool: &DbPool, state: &State) -> AppResult<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE execution_state
        SET step = $2, status = $3, outputs = $4, arguments = $5,
            version = version + 1, updated_at = $6
        WHERE execution_id = $1
        RETURNING version
        "#,
    )
    .bind(state.execution_id)
    .bind(&state.step)
    .bind(state.status.as_str())
    .bind(Json(&state.outputs))
    .bind(Json(&state.arguments))
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0))
}

/// Write the state row only if its version still matches `state.version`.
/// Returns the new version, or `None` when another writer got there first.
pub async fn update_state_if_version(pool: &DbPool, state: &State) -> AppResult<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE execution_state
        SET step = $2, status = $3, outputs = $4, arguments = $5,
            version = version + 1, updated_at = $6
        WHERE execution_id = $1 AND version = $7
        RETURNING version
        "#,
    )
    .bind(state.execution_id)
    .bind(&state.step)
    .bind(state.status.as_str())
    .bind(Json(&state.outputs))
    .bind(Json(&state.arguments))
    .bind(Utc::now())
    .bind(state.version)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0))
}
