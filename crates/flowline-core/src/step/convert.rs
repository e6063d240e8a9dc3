//! Typed views of attribute values.

use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, SourceRange};
use flowline_types::error::InputError;
use flowline_types::value::Value;

/// An attribute value of the wrong type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    pub attribute: String,
    pub expected: &'static str,
    pub actual: &'static str,
}

impl TypeMismatch {
    fn new(attribute: &str, expected: &'static str, value: &Value) -> Self {
        Self {
            attribute: attribute.to_string(),
            expected,
            actual: value.type_name(),
        }
    }

    pub fn into_diagnostic(self, subject: &SourceRange) -> Diagnostic {
        Diagnostic::error(
            "Incorrect attribute value type",
            format!(
                "Inappropriate value for attribute \"{}\": {} required, got {}.",
                self.attribute, self.expected, self.actual
            ),
        )
        .with_subject(subject.clone())
    }

    pub fn into_input_error(self, step: &str) -> InputError {
        InputError::InvalidType {
            step: step.to_string(),
            attribute: self.attribute,
            expected: self.expected,
            actual: self.actual,
        }
    }
}

pub type Converted<T> = Result<T, TypeMismatch>;

/// Strings; numbers and bools are rendered.
pub fn string(name: &str, value: Value) -> Converted<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(TypeMismatch::new(name, "string", &other)),
    }
}

/// Bools; `"true"` and `"false"` strings are accepted.
pub fn boolean(name: &str, value: Value) -> Converted<bool> {
    match &value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(TypeMismatch::new(name, "bool", other)),
    }
}

/// Whole numbers; numeric strings are accepted.
pub fn integer(name: &str, value: Value) -> Converted<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
        .ok_or_else(|| TypeMismatch::new(name, "whole number", &value))
}

/// Lists of strings; a single string becomes a one-element list.
pub fn string_list(name: &str, value: Value) -> Converted<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(TypeMismatch::new(name, "list of string", &other)),
            })
            .collect(),
        other => Err(TypeMismatch::new(name, "list of string", &other)),
    }
}

pub fn string_map(name: &str, value: Value) -> Converted<BTreeMap<String, String>> {
    match value {
        Value::Map(map) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k, s)),
                Value::Number(_) | Value::Bool(_) => Ok((k, v.to_string())),
                other => Err(TypeMismatch::new(name, "map of string", &other)),
            })
            .collect(),
        other => Err(TypeMismatch::new(name, "map of string", &other)),
    }
}

pub fn map(name: &str, value: Value) -> Converted<BTreeMap<String, Value>> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(TypeMismatch::new(name, "map", &other)),
    }
}

pub fn list(name: &str, value: Value) -> Converted<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(TypeMismatch::new(name, "list", &other)),
    }
}

// ---------------------------------------------------------------------------
// Input maps
// ---------------------------------------------------------------------------

/// Builder for the input map handed to the execution engine.
#[derive(Debug, Default)]
pub struct Inputs(BTreeMap<String, Value>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` when set.
    pub fn opt<T: Clone + Into<Value>>(mut self, name: &str, value: &Option<T>) -> Self {
        if let Some(value) = value {
            self.0.insert(name.to_string(), value.clone().into());
        }
        self
    }

    pub fn opt_map<T: Clone + Into<Value>>(mut self, name: &str, value: &Option<BTreeMap<String, T>>) -> Self {
        if let Some(map) = value {
            let map = map.iter().map(|(k, v)| (k.clone(), v.clone().into())).collect();
            self.0.insert(name.to_string(), Value::Map(map));
        }
        self
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn build(self) -> BTreeMap<String, Value> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_accepts_single_string() {
        assert_eq!(string_list("to", Value::from("a@b.c")).unwrap(), vec!["a@b.c"]);
        let err = string_list("to", Value::from(vec![Value::from(1_i64)])).unwrap_err();
        assert_eq!(err.expected, "list of string");
        assert_eq!(err.actual, "number");
    }

    #[test]
    fn test_integer_rejects_fraction() {
        assert_eq!(integer("port", Value::from("587")).unwrap(), 587);
        assert!(integer("port", Value::Number(1.5)).is_err());
    }

    #[test]
    fn test_type_mismatch_diagnostic() {
        let err = boolean("insecure", Value::from(vec!["x"])).unwrap_err();
        let diag = err.into_diagnostic(&SourceRange::new(None, "step.http.s.insecure"));
        assert!(diag.detail.contains("bool required, got list"), "got: {}", diag.detail);
    }

    #[test]
    fn test_inputs_skip_unset() {
        let inputs = Inputs::new()
            .opt("url", &Some("https://x".to_string()))
            .opt::<String>("method", &None)
            .build();
        assert_eq!(inputs.len(), 1);
    }
}
