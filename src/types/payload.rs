//! # Task Payloads
//!
//! Task input and output travel as JSON objects. [`TaskPayload`] wraps the object map
//! and offers typed extraction: a field that is missing or has the wrong JSON type
//! yields a [`LoanflowError::Validation`] naming the field, never a zero value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LoanflowError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(Map<String, Value>);

impl TaskPayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Field present with a non-null value
    fn present(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Required string; empty strings count as missing.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.optional_str(key)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(missing(key)),
        }
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&str>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(wrong_type(key, "a string", other)),
        }
    }

    /// Required number. Integers and floats are accepted; numeric strings are not.
    pub fn require_f64(&self, key: &str) -> Result<f64> {
        self.optional_f64(key)?.ok_or_else(|| missing(key))
    }

    pub fn optional_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| LoanflowError::validation(format!("{key} is not a finite number"))),
            Some(other) => Err(wrong_type(key, "a number", other)),
        }
    }

    /// Required whole number; floats with a fractional part are rejected.
    pub fn require_i64(&self, key: &str) -> Result<i64> {
        self.optional_i64(key)?.ok_or_else(|| missing(key))
    }

    pub fn optional_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Some(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                    _ => Err(LoanflowError::validation(format!(
                        "{key} must be a whole number, got {n}"
                    ))),
                }
            }
            Some(other) => Err(wrong_type(key, "a whole number", other)),
        }
    }

    pub fn require_bool(&self, key: &str) -> Result<bool> {
        self.optional_bool(key)?.ok_or_else(|| missing(key))
    }

    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(wrong_type(key, "a boolean", other)),
        }
    }

    pub fn optional_object(&self, key: &str) -> Result<Option<&Map<String, Value>>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(wrong_type(key, "an object", other)),
        }
    }

    pub fn optional_array(&self, key: &str) -> Result<Option<&Vec<Value>>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(wrong_type(key, "an array", other)),
        }
    }
}

fn missing(key: &str) -> LoanflowError {
    LoanflowError::validation(format!("{key} is required"))
}

fn wrong_type(key: &str, expected: &str, actual: &Value) -> LoanflowError {
    LoanflowError::validation(format!(
        "{key} must be {expected}, got {}",
        json_type_name(actual)
    ))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<Map<String, Value>> for TaskPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for TaskPayload {
    type Error = LoanflowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(LoanflowError::validation(format!(
                "task payload must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

impl From<TaskPayload> for Value {
    fn from(payload: TaskPayload) -> Self {
        payload.into_value()
    }
}

impl FromIterator<(String, Value)> for TaskPayload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
