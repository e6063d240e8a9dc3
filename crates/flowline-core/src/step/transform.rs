use std::collections::BTreeMap;

use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::Converted;

/// Compute a value from other values. `value` may legitimately be null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl StepPayload for TransformStep {
    const ATTRIBUTES: &'static [&'static str] = &["value"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        if name == "value" {
            self.value = Some(value);
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([("value".to_string(), self.value.clone().unwrap_or_default())])
    }
}
