//! Execution query and cancellation handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::engine::messages::{CancelTagsRequest, ExecutionStateResponse};
use crate::error::AppError;
use crate::services::{CancelSummary, ExecutionService};

/// Get the current step, status and outputs of an execution.
///
/// GET /api/executions/{uuid}
pub async fn get(
    State(service): State<ExecutionService>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<ExecutionStateResponse>, AppError> {
    Ok(Json(service.get_by_uuid(uuid).await?))
}

/// Cancel an execution and its scheduled job.
///
/// POST /api/executions/{uuid}/cancel
pub async fn cancel(
    State(service): State<ExecutionService>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<CancelSummary>, AppError> {
    Ok(Json(service.cancel_by_uuid(uuid).await?))
}

/// POST /api/executions/cancel
pub async fn cancel_by_tags(
    State(service): State<ExecutionService>,
    Json(request): Json<CancelTagsRequest>,
) -> Result<Json<CancelSummary>, AppError> {
    Ok(Json(service.cancel_by_tags(&request.tags).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateWriteMode;
    use crate::engine::state::{NewExecution, Status, Step};
    use crate::repository::ExecutionRepository;
    use crate::scheduler::{JobScheduler, StandaloneElector};
    use crate::testing::InMemoryRepository;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn seeded() -> (Arc<InMemoryRepository>, ExecutionService, Uuid, i64) {
        let repository = Arc::new(InMemoryRepository::default());
        let service = ExecutionService::new(
            repository.clone(),
            Arc::new(JobScheduler::new(Arc::new(StandaloneElector))),
            StateWriteMode::Optimistic,
        );
        let execution = repository
            .create_execution(NewExecution {
                uuid: Uuid::new_v4(),
                workflow_id: 1,
                job_id: None,
                tags: vec!["team-a".to_string()],
                parameters: None,
                steps: vec![Step {
                    service: "svcA".to_string(),
                    name: "s1".to_string(),
                    task: "t1".to_string(),
                    order: 0,
                    input: BTreeMap::new(),
                }],
                arguments: BTreeMap::new(),
            })
            .await
            .unwrap();
        (repository, service, execution.uuid, execution.id)
    }

    #[tokio::test]
    async fn test_get_execution_state() {
        let (_, service, uuid, _) = seeded().await;
        let Json(body) = get(State(service), Path(uuid)).await.unwrap();
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"step": "s1", "status": "PENDING", "outputs": {}})
        );
    }

    #[tokio::test]
    async fn test_get_unknown_execution() {
        let (_, service, _, _) = seeded().await;
        let result = get(State(service), Path(Uuid::new_v4())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_by_tags_endpoint() {
        let (repository, service, uuid, id) = seeded().await;
        let request = CancelTagsRequest {
            tags: vec!["team-a".to_string()],
        };
        let Json(summary) = cancel_by_tags(State(service), Json(request)).await.unwrap();
        assert_eq!(summary.cancelled, vec![uuid]);
        assert_eq!(repository.state(id).unwrap().status, Status::Cancelled);
    }
}
