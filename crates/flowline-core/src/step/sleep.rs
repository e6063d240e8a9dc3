use std::collections::BTreeMap;
use std::time::Duration;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{Converted, Inputs, TypeMismatch};

/// Wait for a fixed duration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SleepStep {
    /// Milliseconds as a number, or a string such as `250ms`, `5s`, `2m`, `1h`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
}

impl SleepStep {
    pub fn duration(&self) -> Option<Result<Duration, String>> {
        self.duration.as_ref().map(parse_duration)
    }
}

/// Parse a sleep duration.
pub fn parse_duration(value: &Value) -> Result<Duration, String> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(Duration::from_millis(*n as u64)),
        Value::Number(n) => Err(format!("{n} is not a whole, non-negative number of milliseconds")),
        Value::String(s) => parse_duration_str(s),
        other => Err(format!("a duration must be a number or string, got {}", other.type_name())),
    }
}

fn parse_duration_str(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration \"{text}\""))?;
    let millis = match unit.trim() {
        "" | "ms" => amount,
        "s" => amount.saturating_mul(1_000),
        "m" => amount.saturating_mul(60_000),
        "h" => amount.saturating_mul(3_600_000),
        other => return Err(format!("invalid duration unit \"{other}\" in \"{text}\", expected ms, s, m or h")),
    };
    Ok(Duration::from_millis(millis))
}

impl StepPayload for SleepStep {
    const ATTRIBUTES: &'static [&'static str] = &["duration"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        if name == "duration" {
            match value {
                Value::Number(_) | Value::String(_) => self.duration = Some(value),
                other => {
                    return Err(TypeMismatch {
                        attribute: name.to_string(),
                        expected: "number or string",
                        actual: other.type_name(),
                    });
                }
            }
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        Inputs::new().opt("duration", &self.duration).build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        self.duration.is_none().then_some("duration")
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Some(Err(reason)) = self.duration() {
            diags.push(
                Diagnostic::validation("Invalid sleep duration", reason).with_subject(range.child("duration")),
            );
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration(&Value::from(250_i64)).unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(&Value::from("250ms")).unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(&Value::from("5s")).unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration(&Value::from("2m")).unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(&Value::from("1h")).unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(&Value::from("1500")).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration(&Value::from("soon")).is_err());
        assert!(parse_duration(&Value::from("5d")).is_err());
        assert!(parse_duration(&Value::Number(-1.0)).is_err());
        assert!(parse_duration(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_validate_reports_bad_duration() {
        let mut step = SleepStep::default();
        step.set_value("duration", Value::from("5 parsecs")).unwrap();
        let diags = step.validate(&SourceRange::new(None, "step.sleep.s"));
        assert_eq!(diags.len(), 1);
        let msg = diags.to_string();
        assert!(msg.contains("Invalid sleep duration"), "got: {msg}");
    }

    #[test]
    fn test_bool_duration_is_type_error() {
        let mut step = SleepStep::default();
        assert!(step.set_value("duration", Value::Bool(true)).is_err());
    }
}
