//! Step execution output as produced by the execution engine.
//!
//! The engine fills `Output` after running a step. The resolution core owns
//! the conversion into a `Value`, which is what `result` (inside loop, retry
//! and throw blocks) and `step.<kind>.<name>` references see.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Output attribute carrying the engine status.
pub const STATUS_KEY: &str = "status";
/// Output attribute carrying recorded step errors.
pub const ERRORS_KEY: &str = "errors";

/// Outcome of one step execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Output {
    /// Engine status string (e.g. "finished", "failed").
    #[serde(default)]
    pub status: String,
    /// Kind-specific output attributes (e.g. `status_code`, `response_body`).
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StepError>,
}

/// An error recorded against a step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub pipeline_execution_id: String,
    pub step_execution_id: String,
    pub pipeline: String,
    pub step: String,
    pub error: ErrorDetail,
}

/// Problem-details style error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub instance: String,
    pub detail: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
}

impl Output {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: StepError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Data entries hidden by the engine's own `status` and `errors` in
    /// `to_value`.
    pub fn shadowed_data_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        if !self.status.is_empty() && self.data.contains_key(STATUS_KEY) {
            keys.push(STATUS_KEY);
        }
        if !self.errors.is_empty() && self.data.contains_key(ERRORS_KEY) {
            keys.push(ERRORS_KEY);
        }
        keys
    }

    /// The dynamic value expressions see for this output.
    ///
    /// Data entries are placed at the top level. `status` is added when the
    /// engine set one and `errors` when any were recorded. The engine's
    /// values win over data entries of the same name; an unset status or an
    /// empty error list leaves the data entry visible.
    pub fn to_value(&self) -> Value {
        let mut map = self.data.clone();
        if !self.status.is_empty() {
            map.insert(STATUS_KEY.to_string(), Value::from(self.status.as_str()));
        }
        if !self.errors.is_empty() {
            map.insert(
                ERRORS_KEY.to_string(),
                Value::List(self.errors.iter().map(StepError::to_value).collect()),
            );
        }
        Value::Map(map)
    }
}

impl StepError {
    pub fn to_value(&self) -> Value {
        Value::map([
            (
                "pipeline_execution_id",
                Value::from(self.pipeline_execution_id.as_str()),
            ),
            ("step_execution_id", Value::from(self.step_execution_id.as_str())),
            ("pipeline", Value::from(self.pipeline.as_str())),
            ("step", Value::from(self.step.as_str())),
            ("error", self.error.to_value()),
        ])
    }
}

impl ErrorDetail {
    pub fn to_value(&self) -> Value {
        Value::map([
            ("instance", Value::from(self.instance.as_str())),
            ("detail", Value::from(self.detail.as_str())),
            ("type", Value::from(self.error_type.as_str())),
            ("title", Value::from(self.title.as_str())),
            ("status", Value::from(u32::from(self.status))),
        ])
    }
}

impl From<&Output> for Value {
    fn from(output: &Output) -> Self {
        output.to_value()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
