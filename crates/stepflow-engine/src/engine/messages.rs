//! Wire messages exchanged over the bus and the HTTP surface.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::state::{NewExecution, Parameters, Step};
use super::value::Value;

/// Step as declared in a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStep {
    pub service: String,
    pub name: String,
    pub task: String,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
}

impl SubmissionStep {
    pub fn to_step(&self, order: usize) -> Step {
        Step {
            service: self.service.clone(),
            name: self.name.clone(),
            task: self.task.clone(),
            order,
            input: self.input.clone(),
        }
    }
}

/// Scheduling parameters as submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_definition: Option<String>,
    #[serde(
        default,
        deserialize_with = "delay_from_number_or_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub delayed_seconds: Option<u64>,
}

impl From<SubmissionParameters> for Parameters {
    fn from(params: SubmissionParameters) -> Self {
        Parameters {
            cron_definition: params.cron_definition,
            delayed_seconds: params.delayed_seconds,
        }
    }
}

/// Workflow submission consumed from the submissions subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMessage {
    #[serde(rename = "workflowID", default)]
    pub workflow_id: i64,
    #[serde(rename = "executionUUID", alias = "ExecutionUUID")]
    pub execution_uuid: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Option<SubmissionParameters>,
    /// Argument values, normalized to text: strings verbatim, anything else
    /// as compact JSON.
    #[serde(default, deserialize_with = "args_as_text")]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<SubmissionStep>,
}

impl SubmissionMessage {
    /// First step name declared more than once, if any.
    pub fn duplicate_step_name(&self) -> Option<&str> {
        let mut seen = BTreeSet::new();
        self.steps
            .iter()
            .map(|s| s.name.as_str())
            .find(|name| !seen.insert(*name))
    }

    /// Materialize a new execution, or `None` when there are no steps or
    /// step names are not unique.
    pub fn to_new_execution(&self, uuid: Uuid, job_id: Option<Uuid>) -> Option<NewExecution> {
        if self.steps.is_empty() || self.duplicate_step_name().is_some() {
            return None;
        }
        Some(NewExecution {
            uuid,
            workflow_id: self.workflow_id,
            job_id,
            tags: self.tags.clone(),
            parameters: self.parameters.clone().map(Parameters::from),
            steps: self
                .steps
                .iter()
                .enumerate()
                .map(|(order, step)| step.to_step(order))
                .collect(),
            arguments: self.args.clone(),
        })
    }
}

/// Step ready for dispatch, carried on the internal steps subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMessage {
    pub service: String,
    pub name: String,
    pub task: String,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
    pub execution_id: i64,
    pub step_order: usize,
}

impl StepMessage {
    pub fn new(execution_id: i64, step: &Step) -> Self {
        Self {
            service: step.service.clone(),
            name: step.name.clone(),
            task: step.task.clone(),
            input: step.input.clone(),
            execution_id,
            step_order: step.order,
        }
    }
}

/// Task invocation published to a worker service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub execution_id: i64,
    pub task_name: String,
    pub inputs: BTreeMap<String, Value>,
}

/// Worker result consumed from a service's output subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub execution_id: i64,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

/// Body of the execution query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStateResponse {
    pub step: String,
    pub status: String,
    pub outputs: BTreeMap<String, Value>,
}

/// Body of the cancel-by-tags endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTagsRequest {
    pub tags: Vec<String>,
}

fn args_as_text<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.to_text()))
        .collect())
}

fn delay_from_number_or_text<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Delay {
        Number(u64),
        Text(String),
    }

    match Option::<Delay>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Delay::Number(n)) => Ok(Some(n)),
        Some(Delay::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Delay::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid delayedSeconds: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::Schedule;

    const SUBMISSION: &str = r#"{
        "workflowID": 3,
        "executionUUID": "6f1c2a4e-1111-4b2a-9c3d-1234567890ab",
        "tags": ["nightly"],
        "args": {"name": "bob", "count": 3, "flags": {"a": true}},
        "steps": [
            {"service": "svcA", "name": "s1", "task": "t1", "input": {"who": "$args.name"}},
            {"service": "native", "name": "s2", "task": "abort"}
        ]
    }"#;

    #[test]
    fn test_submission_deserialization() {
        let submission: SubmissionMessage = serde_json::from_str(SUBMISSION).unwrap();
        assert_eq!(submission.workflow_id, 3);
        assert_eq!(submission.tags, vec!["nightly"]);
        assert_eq!(submission.args["name"], "bob");
        assert_eq!(submission.args["count"], "3");
        assert_eq!(submission.args["flags"], r#"{"a":true}"#);
        assert!(submission.parameters.is_none());

        let new = submission
            .to_new_execution(submission.execution_uuid, None)
            .unwrap();
        assert_eq!(new.steps.len(), 2);
        assert_eq!(new.steps[1].order, 1);
        assert!(new.steps[1].input.is_empty());
    }

    #[test]
    fn test_zero_steps_yields_nothing() {
        let submission: SubmissionMessage = serde_json::from_str(
            r#"{"workflowID": 1, "executionUUID": "6f1c2a4e-1111-4b2a-9c3d-1234567890ab", "steps": []}"#,
        )
        .unwrap();
        assert!(submission
            .to_new_execution(submission.execution_uuid, None)
            .is_none());
    }

    #[test]
    fn test_duplicate_step_names_yield_nothing() {
        let submission: SubmissionMessage = serde_json::from_str(
            r#"{"executionUUID": "6f1c2a4e-1111-4b2a-9c3d-1234567890ab", "steps": [
                {"service": "svcA", "name": "a", "task": "t1"},
                {"service": "svcA", "name": "b", "task": "t2"},
                {"service": "svcA", "name": "a", "task": "t3"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(submission.duplicate_step_name(), Some("a"));
        assert!(submission
            .to_new_execution(submission.execution_uuid, None)
            .is_none());
    }

    #[test]
    fn test_parameters_accept_textual_delay() {
        let params: SubmissionParameters =
            serde_json::from_str(r#"{"delayedSeconds": "30"}"#).unwrap();
        assert_eq!(
            Parameters::from(params).schedule(),
            Some(Schedule::Delay(30))
        );

        let params: SubmissionParameters =
            serde_json::from_str(r#"{"cronDefinition": "*/5 * * * *", "delayedSeconds": 30}"#)
                .unwrap();
        assert_eq!(
            Parameters::from(params).schedule(),
            Some(Schedule::Cron("*/5 * * * *".to_string()))
        );
    }

    #[test]
    fn test_step_message_wire_format() {
        let step = Step {
            service: "svcA".to_string(),
            name: "s1".to_string(),
            task: "t1".to_string(),
            order: 0,
            input: BTreeMap::new(),
        };
        let json = serde_json::to_value(StepMessage::new(12, &step)).unwrap();
        assert_eq!(json["execution_id"], 12);
        assert_eq!(json["step_order"], 0);
        assert_eq!(json["task"], "t1");
    }

    #[test]
    fn test_dispatch_and_response_wire_format() {
        let dispatch = DispatchMessage {
            execution_id: 5,
            task_name: "t1".to_string(),
            inputs: BTreeMap::from([("x".to_string(), Value::from(1_i64))]),
        };
        let json = serde_json::to_value(&dispatch).unwrap();
        assert_eq!(json["executionId"], 5);
        assert_eq!(json["taskName"], "t1");
        assert_eq!(json["inputs"]["x"], 1);

        let response: WorkerResponse =
            serde_json::from_str(r#"{"executionId": 5, "outputs": {"x": "1"}}"#).unwrap();
        assert_eq!(response.outputs["x"], Value::from("1"));
    }
}
