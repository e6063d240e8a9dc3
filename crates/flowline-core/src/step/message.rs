use std::collections::BTreeMap;

use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// Send a one-way notification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
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
}

impl StepPayload for MessageStep {
    const ATTRIBUTES: &'static [&'static str] = &[
        "notifier",
        "text",
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
    const BLOCKS: &'static [&'static str] = &["notify"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name.strip_prefix("notify.").unwrap_or(name) {
            "notifier" => self.notifier = Some(value),
            "text" => self.text = Some(convert::string(name, value)?),
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
        Inputs::new()
            .opt("notifier", &self.notifier)
            .opt("text", &self.text)
            .opt("subject", &self.subject)
            .opt("channel", &self.channel)
            .opt("to", &self.to)
            .opt("cc", &self.cc)
            .opt("bcc", &self.bcc)
            .build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        self.text.is_none().then_some("text")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_required() {
        let mut step = MessageStep::default();
        assert_eq!(step.missing_required(), Some("text"));
        step.set_value("text", Value::from("deployed")).unwrap();
        assert_eq!(step.missing_required(), None);
    }

    #[test]
    fn test_notify_recipients() {
        let mut step = MessageStep::default();
        step.set_value("notify.to", Value::from(vec!["a@x.io", "b@x.io"])).unwrap();
        assert_eq!(step.inputs()["to"], Value::from(vec!["a@x.io", "b@x.io"]));
    }
}
