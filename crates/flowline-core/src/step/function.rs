use std::collections::BTreeMap;

use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// Invoke a function from local source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
}

impl StepPayload for FunctionStep {
    const ATTRIBUTES: &'static [&'static str] = &["source", "handler", "runtime", "env", "event"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name {
            "source" => self.source = Some(convert::string(name, value)?),
            "handler" => self.handler = Some(convert::string(name, value)?),
            "runtime" => self.runtime = Some(convert::string(name, value)?),
            "env" => self.env = Some(convert::string_map(name, value)?),
            "event" => self.event = Some(value),
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        Inputs::new()
            .opt("source", &self.source)
            .opt("handler", &self.handler)
            .opt("runtime", &self.runtime)
            .opt_map("env", &self.env)
            .opt("event", &self.event)
            .build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        self.source.is_none().then_some("source")
    }
}
