//! Execution store.
//!
//! Handlers read an execution, mutate its state in memory and write the whole
//! state back through [`ExecutionRepository::update_state`]. The write mode
//! decides whether a concurrent writer is detected or silently overwritten.

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::StateWriteMode;
use crate::db::queries::execution as queries;
use crate::db::DbPool;
use crate::engine::state::{Execution, NewExecution, State};
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Persist an execution and its initial state atomically.
    async fn create_execution(&self, new: NewExecution) -> AppResult<Execution>;

    async fn get_execution(&self, id: i64) -> AppResult<Option<Execution>>;

    async fn find_by_uuid(&self, uuid: Uuid) -> AppResult<Option<Execution>>;

    /// Executions carrying at least one of `tags`.
    async fn find_by_tags(&self, tags: &[String]) -> AppResult<Vec<Execution>>;

    /// Write `state` back and bump `state.version`.
    ///
    /// In optimistic mode a write against an outdated version fails with
    /// [`AppError::StaleState`].
    async fn update_state(&self, state: &mut State, mode: StateWriteMode) -> AppResult<()>;
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgExecutionRepository {
    pool: DbPool,
}

impl PgExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn create_execution(&self, new: NewExecution) -> AppResult<Execution> {
        let id = queries::insert_execution(&self.pool, &new).await?;
        let record = queries::get_execution(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("execution {} vanished after insert", id)))?;
        Execution::try_from(record)
    }

    async fn get_execution(&self, id: i64) -> AppResult<Option<Execution>> {
        queries::get_execution(&self.pool, id)
            .await?
            .map(Execution::try_from)
            .transpose()
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> AppResult<Option<Execution>> {
        queries::get_execution_by_uuid(&self.pool, uuid)
            .await?
            .map(Execution::try_from)
            .transpose()
    }

    async fn find_by_tags(&self, tags: &[String]) -> AppResult<Vec<Execution>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        queries::get_executions_by_tags(&self.pool, tags)
            .await?
            .into_iter()
            .map(Execution::try_from)
            .collect()
    }

    async fn update_state(&self, state: &mut State, mode: StateWriteMode) -> AppResult<()> {
        let written = match mode {
            StateWriteMode::Optimistic => {
                queries::update_state_if_version(&self.pool, state)
                    .await?
                    .ok_or(AppError::StaleState {
                        execution_id: state.execution_id,
                        expected: state.version,
                    })?
            }
            StateWriteMode::LastWriteWins => queries::update_state(&self.pool, state)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("execution {}", state.execution_id))
                })?,
        };
        state.version = written;
        Ok(())
    }
}
