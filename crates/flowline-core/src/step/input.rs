use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::pipeline::{InputType, OptionStyle};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

const OPTION_ATTRIBUTES: &[&str] = &["label", "selected", "style"];

/// Ask a person for input through a notifier.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Kept verbatim; `validate` checks membership.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
    /// Declared `option "<value>"` blocks, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<InputOption>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl InputOption {
    fn to_value(&self) -> Value {
        Value::Map(
            Inputs::new()
                .set("value", self.value.as_str())
                .opt("label", &self.label)
                .opt("selected", &self.selected)
                .opt("style", &self.style)
                .build(),
        )
    }
}

impl InputStep {
    fn option_mut(&mut self, value: &str) -> &mut InputOption {
        let index = match self.options.iter().position(|o| o.value == value) {
            Some(index) => index,
            None => {
                self.options.push(InputOption {
                    value: value.to_string(),
                    ..InputOption::default()
                });
                self.options.len() - 1
            }
        };
        &mut self.options[index]
    }
}

/// Split `option.<value>.<attr>` into its value and attribute.
fn option_attribute(name: &str) -> Option<(&str, &str)> {
    let (value, attr) = name.strip_prefix("option.")?.rsplit_once('.')?;
    OPTION_ATTRIBUTES.contains(&attr).then_some((value, attr))
}

impl StepPayload for InputStep {
    const ATTRIBUTES: &'static [&'static str] = &[
        "prompt",
        "type",
        "notifier",
        "subject",
        "channel",
        "to",
        "cc",
        "bcc",
        "notify.notifier",
        "notify.subject",
        "notify.channel",
        "notify.to",
        "notify.cc",
        "notify.bcc",
    ];
    const BLOCKS: &'static [&'static str] = &["option", "notify"];

    fn accepts(&self, name: &str) -> bool {
        Self::ATTRIBUTES.contains(&name) || option_attribute(name).is_some()
    }

    fn open_block(&mut self, block_type: &str, labels: &[String]) {
        if let ("option", [value]) = (block_type, labels) {
            self.option_mut(value);
        }
    }

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        if let Some((option, attr)) = option_attribute(name) {
            let option = option.to_string();
            match attr {
                "label" => self.option_mut(&option).label = Some(convert::string(name, value)?),
                "selected" => self.option_mut(&option).selected = Some(convert::boolean(name, value)?),
                _ => self.option_mut(&option).style = Some(convert::string(name, value)?),
            }
            return Ok(());
        }
        match name.strip_prefix("notify.").unwrap_or(name) {
            "prompt" => self.prompt = Some(convert::string(name, value)?),
            "type" => self.input_type = Some(convert::string(name, value)?),
            "notifier" => self.notifier = Some(value),
            "subject" => self.subject = Some(convert::string(name, value)?),
            "channel" => self.channel = Some(convert::string(name, value)?),
            "to" => self.to = Some(convert::string_list(name, value)?),
            "cc" => self.cc = Some(convert::string_list(name, value)?),
            "bcc" => self.bcc = Some(convert::string_list(name, value)?),
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        let mut inputs = Inputs::new()
            .opt("prompt", &self.prompt)
            .opt("type", &self.input_type)
            .opt("notifier", &self.notifier)
            .opt("subject", &self.subject)
            .opt("channel", &self.channel)
            .opt("to", &self.to)
            .opt("cc", &self.cc)
            .opt("bcc", &self.bcc);
        if !self.options.is_empty() {
            inputs = inputs.set(
                "options",
                Value::List(self.options.iter().map(InputOption::to_value).collect()),
            );
        }
        inputs.build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        self.input_type.is_none().then_some("type")
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Some(input_type) = &self.input_type {
            match input_type.parse::<InputType>() {
                Ok(InputType::Text) => {}
                Ok(_) if self.options.is_empty() => diags.push(
                    Diagnostic::validation(
                        "Missing options",
                        format!("An input of type \"{input_type}\" needs at least one option block."),
                    )
                    .with_subject(range.clone()),
                ),
                Ok(_) => {}
                Err(e) => diags.push(
                    Diagnostic::validation("Invalid input type", e.to_string()).with_subject(range.child("type")),
                ),
            }
        }
        for option in &self.options {
            if let Some(style) = &option.style {
                if let Err(e) = style.parse::<OptionStyle>() {
                    diags.push(
                        Diagnostic::validation("Invalid option style", e.to_string())
                            .with_subject(range.child("option").child(&option.value).child("style")),
                    );
                }
            }
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> SourceRange {
        SourceRange::new(None, "step.input.approve")
    }

    #[test]
    fn test_option_attributes_accepted() {
        let step = InputStep::default();
        assert!(step.accepts("option.yes.label"));
        assert!(step.accepts("option.v1.2.style"));
        assert!(!step.accepts("option.yes.color"));
        assert!(!step.accepts("options"));
    }

    #[test]
    fn test_options_keep_declaration_order() {
        let mut step = InputStep::default();
        step.open_block("option", &["no".to_string()]);
        step.set_value("option.yes.label", Value::from("Yes")).unwrap();
        step.set_value("option.no.style", Value::from("alert")).unwrap();
        let values: Vec<_> = step.options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["no", "yes"]);
        assert_eq!(step.options[0].style.as_deref(), Some("alert"));
    }

    #[test]
    fn test_type_and_style_validated() {
        let mut step = InputStep::default();
        step.set_value("type", Value::from("checkbox")).unwrap();
        step.set_value("option.a.style", Value::from("fancy")).unwrap();
        let diags = step.validate(&range());
        assert_eq!(diags.len(), 2);
        let msg = diags.to_string();
        assert!(msg.contains("button, text, select, multiselect"), "got: {msg}");
        assert!(msg.contains("default, ok, info, alert"), "got: {msg}");
    }

    #[test]
    fn test_select_requires_options() {
        let mut step = InputStep::default();
        step.set_value("type", Value::from("select")).unwrap();
        assert_eq!(step.validate(&range()).len(), 1);
        step.open_block("option", &["a".to_string()]);
        assert!(step.validate(&range()).is_empty());
    }

    #[test]
    fn test_notify_block_values_map_to_fields() {
        let mut step = InputStep::default();
        step.set_value("notify.channel", Value::from("#ops")).unwrap();
        assert_eq!(step.channel.as_deref(), Some("#ops"));
    }
}
