//! Execution, step and state model.
//!
//! `State` is the only mutable part of an execution. Every status change goes
//! through [`State::transition`], which rejects moves the state machine does
//! not allow.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::value::Value;

/// Service name of steps handled in-process.
pub const NATIVE_SERVICE: &str = "native";

/// Output key under which failures are recorded.
pub const ERROR_OUTPUT: &str = "error";

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Current step is waiting to be dispatched.
    Pending,
    /// Current step was published to its worker.
    Executing,
    /// Workflow finished.
    Success,
    /// Workflow failed; see the `error` output.
    Failed,
    /// Workflow was cancelled.
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal move.
    ///
    /// `Executing -> Pending` advances to the next step and
    /// `Pending -> Pending` is a native branch jumping to its target.
    pub fn can_transition_to(&self, next: Status) -> bool {
        match self {
            Self::Pending => true,
            Self::Executing => next != Self::Executing,
            Self::Success | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "EXECUTING" => Ok(Self::Executing),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(TransitionError::UnknownStatus(s.to_string())),
        }
    }
}

/// Errors raised by the status state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal status transition {from} -> {to}")]
    Illegal { from: Status, to: Status },

    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

/// Immutable step declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub service: String,
    pub name: String,
    pub task: String,
    /// Zero-based position in the workflow.
    pub order: usize,
    /// Input parameter name -> input expression.
    #[serde(default)]
    pub input: BTreeMap<String, String>,
}

impl Step {
    pub fn is_native(&self) -> bool {
        self.service == NATIVE_SERVICE
    }
}

/// When a submission should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(String),
    Delay(u64),
}

/// Optional recurrence/delay parameters of a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delayed_seconds: Option<u64>,
}

impl Parameters {
    /// Cron wins over delay; an empty cron or a zero delay counts as absent.
    pub fn schedule(&self) -> Option<Schedule> {
        if let Some(cron) = self
            .cron_definition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            return Some(Schedule::Cron(cron.to_string()));
        }
        self.delayed_seconds
            .filter(|secs| *secs > 0)
            .map(Schedule::Delay)
    }
}

/// One recorded output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub key: String,
    pub value: Value,
}

/// Mutable status/cursor/output record of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub execution_id: i64,
    /// Logical name of the active step.
    pub step: String,
    pub status: Status,
    /// Outputs in recording order; a key may appear more than once.
    pub outputs: Vec<OutputEntry>,
    /// Submission arguments, stored verbatim.
    pub arguments: BTreeMap<String, String>,
    /// Incremented by the store on every write.
    pub version: i64,
}

impl State {
    pub fn new(execution_id: i64, first_step: &str, arguments: BTreeMap<String, String>) -> Self {
        Self {
            execution_id,
            step: first_step.to_string(),
            status: Status::Pending,
            outputs: Vec::new(),
            arguments,
            version: 0,
        }
    }

    pub fn transition(&mut self, next: Status) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn push_output(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.outputs.push(OutputEntry {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Move to `FAILED` and record `error` as the failure reason.
    pub fn fail(&mut self, error: impl Into<Value>) -> Result<(), TransitionError> {
        self.transition(Status::Failed)?;
        self.push_output(ERROR_OUTPUT, error);
        Ok(())
    }

    /// Latest value recorded under `key`.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .rev()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    /// Outputs collapsed to a map; later entries win.
    pub fn outputs_map(&self) -> BTreeMap<String, Value> {
        self.outputs
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }
}

/// Execution aggregate as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub uuid: Uuid,
    pub workflow_id: i64,
    /// Scheduled job this run was fired by.
    pub job_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub parameters: Option<Parameters>,
    pub steps: Vec<Step>,
    pub state: State,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Step declared right after `name`, by order index.
    pub fn step_after(&self, name: &str) -> Option<&Step> {
        let current = self.step(name)?;
        self.steps.iter().find(|s| s.order == current.order + 1)
    }
}

/// Execution about to be created; the store assigns the ID.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub uuid: Uuid,
    pub workflow_id: i64,
    pub job_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub parameters: Option<Parameters>,
    /// Never empty.
    pub steps: Vec<Step>,
    pub arguments: BTreeMap<String, String>,
}

impl NewExecution {
    pub fn first_step(&self) -> &Step {
        &self.steps[0]
    }

    /// Materialize with a store-assigned ID and a fresh `PENDING` state.
    pub fn into_execution(self, id: i64, created_at: DateTime<Utc>) -> Execution {
        let first = self.first_step().name.clone();
        let state = State::new(id, &first, self.arguments);
        Execution {
            id,
            uuid: self.uuid,
            workflow_id: self.workflow_id,
            job_id: self.job_id,
            tags: self.tags,
            parameters: self.parameters,
            steps: self.steps,
            state,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, order: usize) -> Step {
        Step {
            service: "svcA".to_string(),
            name: name.to_string(),
            task: "t1".to_string(),
            order,
            input: BTreeMap::new(),
        }
    }

    #[test]
    fn test_status_display_and_parse() {
        assert_eq!(Status::Executing.to_string(), "EXECUTING");
        assert_eq!("cancelled".parse::<Status>().unwrap(), Status::Cancelled);
        assert!("running".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        let mut state = State::new(1, "s1", BTreeMap::new());
        state.transition(Status::Executing).unwrap();
        state.transition(Status::Pending).unwrap();
        state.transition(Status::Executing).unwrap();
        state.transition(Status::Success).unwrap();

        assert_eq!(
            state.transition(Status::Pending),
            Err(TransitionError::Illegal {
                from: Status::Success,
                to: Status::Pending
            })
        );
    }

    #[test]
    fn test_cancel_only_from_live_states() {
        assert!(Status::Pending.can_transition_to(Status::Cancelled));
        assert!(Status::Executing.can_transition_to(Status::Cancelled));
        assert!(!Status::Failed.can_transition_to(Status::Cancelled));
        assert!(!Status::Cancelled.can_transition_to(Status::Cancelled));
    }

    #[test]
    fn test_fail_records_error() {
        let mut state = State::new(1, "s1", BTreeMap::new());
        state.fail("boom").unwrap();
        assert_eq!(state.status, Status::Failed);
        assert_eq!(state.output(ERROR_OUTPUT), Some(&Value::from("boom")));
    }

    #[test]
    fn test_latest_output_wins() {
        let mut state = State::new(1, "s1", BTreeMap::new());
        state.push_output("s1.x", "1");
        state.push_output("s1.x", "2");
        assert_eq!(state.outputs.len(), 2);
        assert_eq!(state.output("s1.x"), Some(&Value::from("2")));
        assert_eq!(state.outputs_map().get("s1.x"), Some(&Value::from("2")));
    }

    #[test]
    fn test_parameters_schedule() {
        let none = Parameters::default();
        assert_eq!(none.schedule(), None);

        let both = Parameters {
            cron_definition: Some("*/10 * * * * *".to_string()),
            delayed_seconds: Some(5),
        };
        assert_eq!(
            both.schedule(),
            Some(Schedule::Cron("*/10 * * * * *".to_string()))
        );

        let delay = Parameters {
            cron_definition: Some("  ".to_string()),
            delayed_seconds: Some(5),
        };
        assert_eq!(delay.schedule(), Some(Schedule::Delay(5)));
    }

    #[test]
    fn test_step_after() {
        let new = NewExecution {
            uuid: Uuid::new_v4(),
            workflow_id: 1,
            job_id: None,
            tags: vec![],
            parameters: None,
            steps: vec![step("s1", 0), step("s2", 1)],
            arguments: BTreeMap::from([("name".to_string(), "bob".to_string())]),
        };
        let execution = new.into_execution(9, Utc::now());

        assert_eq!(execution.state.step, "s1");
        assert_eq!(execution.state.execution_id, 9);
        assert_eq!(execution.state.arguments["name"], "bob");
        assert_eq!(execution.state.status, Status::Pending);
        assert_eq!(execution.step_after("s1").map(|s| s.name.as_str()), Some("s2"));
        assert!(execution.step_after("s2").is_none());
        assert!(execution.step_after("missing").is_none());
    }
}
