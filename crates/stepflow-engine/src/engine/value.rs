//! Values carried by step inputs, arguments and outputs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A closed JSON-like value.
///
/// Serializes exactly like the equivalent JSON document. Numbers compare by
/// numeric value, so `1` and `1.0` are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Parse `raw` as JSON, falling back to the raw text as a string.
    pub fn parse_lenient(raw: &str) -> Self {
        serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string()))
    }

    /// Render as text: strings verbatim, everything else as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => serde_json::Value::from(other.clone()).to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lenient() {
        assert_eq!(Value::parse_lenient("42"), Value::from(42_i64));
        assert_eq!(Value::parse_lenient("true"), Value::Bool(true));
        assert_eq!(Value::parse_lenient("hello world"), Value::from("hello world"));
        assert_eq!(
            Value::parse_lenient(r#"{"a": [1, null]}"#),
            Value::from(serde_json::json!({"a": [1, null]}))
        );
    }

    #[test]
    fn test_numbers_compare_numerically() {
        let int: Value = serde_json::from_str("1").unwrap();
        let float: Value = serde_json::from_str("1.0").unwrap();
        assert_eq!(int, float);
        assert_ne!(int, Value::from("1"));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::from("plain").to_text(), "plain");
        assert_eq!(Value::Bool(false).to_text(), "false");
        assert_eq!(
            Value::from(serde_json::json!({"msg": "boom"})).to_text(),
            r#"{"msg":"boom"}"#
        );
    }

    #[test]
    fn test_serializes_as_plain_json() {
        let value = Value::from(serde_json::json!({"x": "1", "n": 2}));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"n":2,"x":"1"}"#);
    }
}
