// Runtime value type for expression evaluation

use std::fmt;

use serde::Serialize;

use crate::error::EvalError;

/// Dynamically typed scalar produced by expressions and bound by fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl Value {
    /// Coerce to a 64-bit integer. Text must hold a decimal number.
    pub fn to_int(&self) -> Result<i64, EvalError> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(*v as i64),
            Value::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                EvalError::type_error(format!("cannot convert text '{}' to integer", s))
            }),
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Bool(v) => *v,
            Value::Text(s) => !s.is_empty(),
        }
    }

    /// Equality as used by `==`, `!=` and switch case matching:
    /// text against text by value, otherwise numerically when both sides
    /// coerce, otherwise structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => match (self.to_int(), other.to_int()) {
                (Ok(a), Ok(b)) => a == b,
                _ => self == other,
            },
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bool(v) => v.to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
