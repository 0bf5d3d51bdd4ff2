//! Execution row model.
//!
//! An execution and its state live in two tables joined one-to-one on the
//! execution ID; queries always read them together.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::engine::state::{Execution, OutputEntry, Parameters, State, Step};
use crate::error::AppError;

/// Joined `execution` + `execution_state` row.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub workflow_id: i64,
    pub job_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub parameters: Option<Json<Parameters>>,
    pub steps: Json<Vec<Step>>,
    pub created_at: DateTime<Utc>,
    pub step: String,
    pub status: String,
    pub outputs: Json<Vec<OutputEntry>>,
    pub arguments: Json<BTreeMap<String, String>>,
    pub version: i64,
}

impl TryFrom<ExecutionRecord> for Execution {
    type Error = AppError;

    fn try_from(record: ExecutionRecord) -> Result<Self, Self::Error> {
        let state = State {
            execution_id: record.id,
            step: record.step,
            status: record.status.parse()?,
            outputs: record.outputs.0,
            arguments: record.arguments.0,
            version: record.version,
        };
        Ok(Execution {
            id: record.id,
            uuid: record.uuid,
            workflow_id: record.workflow_id,
            job_id: record.job_id,
            tags: record.tags,
            parameters: record.parameters.map(|p| p.0),
            steps: record.steps.0,
            state,
            created_at: record.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::Status;

    #[test]
    fn test_record_into_execution() {
        let record = ExecutionRecord {
            id: 4,
            uuid: Uuid::new_v4(),
            workflow_id: 1,
            job_id: None,
            tags: vec!["a".to_string()],
            parameters: None,
            steps: Json(vec![]),
            created_at: Utc::now(),
            step: "s1".to_string(),
            status: "EXECUTING".to_string(),
            outputs: Json(vec![]),
            arguments: Json(BTreeMap::new()),
            version: 3,
        };
        let execution = Execution::try_from(record).unwrap();
        assert_eq!(execution.state.execution_id, 4);
        assert_eq!(execution.state.status, Status::Executing);
        assert_eq!(execution.state.version, 3);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let record = ExecutionRecord {
            id: 4,
            uuid: Uuid::new_v4(),
            workflow_id: 1,
            job_id: None,
            tags: vec![],
            parameters: None,
            steps: Json(vec![]),
            created_at: Utc::now(),
            step: "s1".to_string(),
            status: "RUNNING".to_string(),
            outputs: Json(vec![]),
            arguments: Json(BTreeMap::new()),
            version: 0,
        };
        assert!(Execution::try_from(record).is_err());
    }
}
