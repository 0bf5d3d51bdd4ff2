//! In-memory collaborators for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::bus::{BusError, Headers, MessageBus};
use crate::config::{ServiceEndpoint, ServiceRegistry, StateWriteMode};
use crate::engine::state::{Execution, NewExecution, State};
use crate::engine::EngineContext;
use crate::error::{AppError, AppResult};
use crate::repository::ExecutionRepository;
use crate::telemetry::Telemetry;

pub const STEPS_SUBJECT: &str = "test.steps";

#[derive(Default)]
pub struct InMemoryRepository {
    executions: Mutex<HashMap<i64, Execution>>,
    next_id: AtomicI64,
}

impl InMemoryRepository {
    pub fn state(&self, id: i64) -> Option<State> {
        self.executions
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.state.clone())
    }

    pub fn all(&self) -> Vec<Execution> {
        let mut all: Vec<Execution> = self.executions.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|e| e.id);
        all
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryRepository {
    async fn create_execution(&self, new: NewExecution) -> AppResult<Execution> {
        let mut executions = self.executions.lock().unwrap();
        if executions.values().any(|e| e.uuid == new.uuid) {
            return Err(AppError::Validation(format!("duplicate uuid {}", new.uuid)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let execution = new.into_execution(id, Utc::now());
        executions.insert(id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: i64) -> AppResult<Option<Execution>> {
        Ok(self.executions.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> AppResult<Option<Execution>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .values()
            .find(|e| e.uuid == uuid)
            .cloned())
    }

    async fn find_by_tags(&self, tags: &[String]) -> AppResult<Vec<Execution>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|e| e.tags.iter().any(|t| tags.contains(t)))
            .collect())
    }

    async fn update_state(&self, state: &mut State, mode: StateWriteMode) -> AppResult<()> {
        let mut executions = self.executions.lock().unwrap();
        let execution = executions
            .get_mut(&state.execution_id)
            .ok_or_else(|| AppError::NotFound(format!("execution {}", state.execution_id)))?;
        if mode == StateWriteMode::Optimistic && execution.state.version != state.version {
            return Err(AppError::StaleState {
                execution_id: state.execution_id,
                expected: state.version,
            });
        }
        state.version = execution.state.version + 1;
        execution.state = state.clone();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub subject: String,
    pub headers: Headers,
    pub payload: serde_json::Value,
}

/// Bus that records every publish; can be switched to fail.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<Published>>,
    failing: AtomicBool,
}

impl RecordingBus {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn on(&self, subject: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|p| p.subject == subject)
            .map(|p| p.payload)
            .collect()
    }

    /// Remove and return what was published on `subject`, keeping the rest.
    pub fn take(&self, subject: &str) -> Vec<Published> {
        let mut published = self.published.lock().unwrap();
        let (taken, kept) = std::mem::take(&mut *published)
            .into_iter()
            .partition(|p| p.subject == subject);
        *published = kept;
        taken
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<Published> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(
        &self,
        subject: &str,
        headers: &Headers,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Publish("broker unavailable".to_string()));
        }
        self.published.lock().unwrap().push(Published {
            subject: subject.to_string(),
            headers: headers.clone(),
            payload: serde_json::from_slice(&payload).unwrap(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub repository: Arc<InMemoryRepository>,
    pub bus: Arc<RecordingBus>,
    pub ctx: Arc<EngineContext>,
}

pub fn harness() -> Harness {
    harness_with_mode(StateWriteMode::Optimistic)
}

pub fn harness_with_mode(write_mode: StateWriteMode) -> Harness {
    let repository = Arc::new(InMemoryRepository::default());
    let bus = Arc::new(RecordingBus::default());
    let services = ServiceRegistry::new([ServiceEndpoint {
        name: "svcA".to_string(),
        input_subject: "svcA.in".to_string(),
        output_subject: "svcA.out".to_string(),
    }])
    .unwrap();

    let ctx = Arc::new(EngineContext {
        repository: repository.clone(),
        bus: bus.clone(),
        services: Arc::new(services),
        telemetry: Telemetry::new("stepflow-test"),
        steps_subject: STEPS_SUBJECT.to_string(),
        write_mode,
    });

    Harness {
        repository,
        bus,
        ctx,
    }
}
