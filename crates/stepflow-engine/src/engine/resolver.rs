//! Step input resolution.
//!
//! Each input expression is one of:
//! - `$args.<key>`: the submission argument, parsed as JSON when it parses
//! - an output key such as `s1.x`: the latest output recorded under that key
//! - anything else: used verbatim as a string literal

use std::collections::BTreeMap;

use thiserror::Error;

use super::state::State;
use super::value::Value;

const ARGS_PREFIX: &str = "$args.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Required argument {key} not found for input {input}")]
    MissingArgument { input: String, key: String },
}

/// Concrete inputs of a step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedInputs {
    pub values: BTreeMap<String, Value>,
    /// Inputs whose expression matched no output and was used as a literal.
    pub literal_fallbacks: Vec<String>,
}

pub fn resolve_inputs(
    state: &State,
    inputs: &BTreeMap<String, String>,
) -> Result<ResolvedInputs, ResolveError> {
    let mut resolved = ResolvedInputs::default();

    for (name, expression) in inputs {
        let value = if let Some(key) = expression.strip_prefix(ARGS_PREFIX) {
            let raw = state
                .arguments
                .get(key)
                .ok_or_else(|| ResolveError::MissingArgument {
                    input: name.clone(),
                    key: key.to_string(),
                })?;
            Value::parse_lenient(raw)
        } else if let Some(output) = state.output(expression) {
            output.clone()
        } else {
            resolved.literal_fallbacks.push(name.clone());
            Value::String(expression.clone())
        };
        resolved.values.insert(name.clone(), value);
    }

    Ok(resolved)
}
