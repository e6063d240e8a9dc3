use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// Run another pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineCallStep {
    /// Either a pipeline object (`${pipeline.child}`) or a pipeline name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, Value>>,
}

impl PipelineCallStep {
    /// Name of the called pipeline.
    pub fn pipeline_name(&self) -> Option<&str> {
        match self.pipeline.as_ref()? {
            Value::String(name) => Some(name),
            value => value.get("name").and_then(Value::as_str),
        }
    }
}

impl StepPayload for PipelineCallStep {
    const ATTRIBUTES: &'static [&'static str] = &["pipeline", "args"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name {
            "pipeline" => self.pipeline = Some(value),
            "args" => self.args = Some(convert::map(name, value)?),
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        Inputs::new()
            .opt("pipeline", &self.pipeline)
            .opt_map("args", &self.args)
            .build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        self.pipeline.is_none().then_some("pipeline")
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if self.pipeline.is_some() && self.pipeline_name().is_none() {
            diags.push(
                Diagnostic::validation(
                    "Invalid pipeline reference",
                    "The pipeline attribute must be a pipeline or a pipeline name.",
                )
                .with_subject(range.child("pipeline")),
            );
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_name_from_object_or_string() {
        let mut step = PipelineCallStep::default();
        step.set_value("pipeline", Value::map([("name", Value::from("child"))])).unwrap();
        assert_eq!(step.pipeline_name(), Some("child"));
        step.set_value("pipeline", Value::from("other")).unwrap();
        assert_eq!(step.pipeline_name(), Some("other"));
    }

    #[test]
    fn test_non_pipeline_value_rejected() {
        let mut step = PipelineCallStep::default();
        step.set_value("pipeline", Value::from(3_i64)).unwrap();
        assert_eq!(step.validate(&SourceRange::default()).len(), 1);
    }
}
