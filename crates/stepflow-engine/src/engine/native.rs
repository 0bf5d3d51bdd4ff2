//! Built-in control-flow tasks of the `native` service.
//!
//! `if` compares two values and routes to one of two steps; `abort` ends the
//! workflow successfully. Any other task name fails the execution.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::error::AppResult;
use crate::result_ext::ResultExt;
use crate::telemetry::TraceContext;

use super::context::EngineContext;
use super::state::{Execution, Status, Step};
use super::value::Value;

/// Branch target meaning "the step after this one".
pub const CONTINUE_TARGET: &str = "continue";

const IF_REQUIRED_INPUTS: [&str; 5] = ["leftValue", "rightValue", "operator", "onTrue", "onFalse"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeOperation {
    If,
    Abort,
    Invalid(String),
}

impl NativeOperation {
    pub fn parse(task: &str) -> Self {
        match task {
            "if" => Self::If,
            "abort" => Self::Abort,
            other => Self::Invalid(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("Following required properties are not specified {}", .0.join(","))]
    MissingProperties(Vec<String>),

    #[error("{0} is not a valid operator")]
    InvalidOperator(String),

    #[error("Path {0} is not found")]
    PathNotFound(String),

    #[error("{0} is not a valid native taskname")]
    InvalidTask(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equal,
    NotEqual,
}

impl Operator {
    fn parse(raw: &str) -> Result<Self, NativeError> {
        match raw.trim() {
            "==" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            other => Err(NativeError::InvalidOperator(other.to_string())),
        }
    }

    fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Equal => left == right,
            Self::NotEqual => left != right,
        }
    }
}

/// Outcome of evaluating an `if` step.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub result: bool,
    /// `None` when the workflow has nothing left to run.
    pub next: Option<Step>,
}

/// Evaluate the `if` step `step_name` against its resolved inputs.
pub fn evaluate_if(
    execution: &Execution,
    step_name: &str,
    inputs: &BTreeMap<String, Value>,
) -> Result<Branch, NativeError> {
    let missing: Vec<String> = IF_REQUIRED_INPUTS
        .iter()
        .filter(|name| !inputs.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(NativeError::MissingProperties(missing));
    }

    let operator = Operator::parse(&inputs["operator"].to_text())?;
    let result = operator.apply(&inputs["leftValue"], &inputs["rightValue"]);
    let target = if result {
        inputs["onTrue"].to_text()
    } else {
        inputs["onFalse"].to_text()
    };

    let next = if target == CONTINUE_TARGET {
        execution.step_after(step_name).cloned()
    } else {
        Some(
            execution
                .step(&target)
                .cloned()
                .ok_or(NativeError::PathNotFound(target))?,
        )
    };

    Ok(Branch { result, next })
}

/// Run native `task` for the current step of `execution`.
pub async fn execute(
    ctx: &EngineContext,
    execution: &mut Execution,
    task: &str,
    inputs: &BTreeMap<String, Value>,
    trace: &TraceContext,
) -> AppResult<()> {
    let step_name = execution.state.step.clone();

    match NativeOperation::parse(task) {
        NativeOperation::If => match evaluate_if(execution, &step_name, inputs) {
            Ok(branch) => follow_branch(ctx, execution, &step_name, branch, trace).await,
            Err(e) => {
                tracing::warn!(execution_id = execution.id, step = %step_name, error = %e, "Conditional step failed");
                ctx.fail(&mut execution.state, e.to_string()).await
            }
        },
        NativeOperation::Abort => {
            execution.state.transition(Status::Success)?;
            ctx.save_state(&mut execution.state).await?;
            tracing::info!(execution_id = execution.id, step = %step_name, "Workflow aborted");
            Ok(())
        }
        NativeOperation::Invalid(task) => {
            let e = NativeError::InvalidTask(task);
            tracing::warn!(execution_id = execution.id, step = %step_name, error = %e, "Unknown native task");
            ctx.fail(&mut execution.state, e.to_string()).await
        }
    }
}

async fn follow_branch(
    ctx: &EngineContext,
    execution: &mut Execution,
    step_name: &str,
    branch: Branch,
    trace: &TraceContext,
) -> AppResult<()> {
    let state = &mut execution.state;
    state.push_output(format!("{}.result", step_name), branch.result);

    let Some(next) = branch.next else {
        state.transition(Status::Success)?;
        ctx.save_state(state).await?;
        tracing::info!(execution_id = execution.id, step = %step_name, "Workflow finished after conditional");
        return Ok(());
    };

    state.step = next.name.clone();
    state.transition(Status::Pending)?;
    ctx.save_state(state).await?;
    tracing::debug!(execution_id = execution.id, from = %step_name, to = %next.name, result = branch.result, "Conditional branch taken");

    if let Err(e) = ctx
        .enqueue_step(execution.id, &next, trace)
        .await
        .log("enqueueing branch target")
    {
        ctx.fail(state, e.to_string()).await?;
    }
    Ok(())
}
