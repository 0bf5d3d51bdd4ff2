//! Idempotent schema bootstrap.

use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Create the engine schema and tables if they do not exist yet.
pub async fn ensure_schema(pool: &DbPool, schema: &str) -> AppResult<()> {
    validate_identifier(schema)?;

    for statement in statements(schema) {
        sqlx::query(&statement).execute(pool).await?;
    }

    tracing::info!(schema = %schema, "Database schema ready");
    Ok(())
}

fn statements(schema: &str) -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.execution (
                id BIGSERIAL PRIMARY KEY,
                uuid UUID NOT NULL UNIQUE,
                workflow_id BIGINT NOT NULL,
                job_id UUID,
                tags TEXT[] NOT NULL DEFAULT '{{}}',
                parameters JSONB,
                steps JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ),
        format!("CREATE INDEX IF NOT EXISTS execution_tags_idx ON {schema}.execution USING GIN (tags)"),
        format!("CREATE INDEX IF NOT EXISTS execution_job_id_idx ON {schema}.execution (job_id)"),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.execution_state (
                execution_id BIGINT PRIMARY KEY REFERENCES {schema}.execution (id) ON DELETE CASCADE,
                step TEXT NOT NULL,
                status TEXT NOT NULL,
                outputs JSONB NOT NULL DEFAULT '[]',
                arguments JSONB NOT NULL DEFAULT '{{}}',
                version BIGINT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.leader_lease (
                election TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#
        ),
    ]
}

fn validate_identifier(schema: &str) -> AppResult<()> {
    let valid = schema
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid schema name: {}", schema)))
    }
}
