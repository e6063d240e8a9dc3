use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// Send an email through an SMTP server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmailStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
}

impl StepPayload for EmailStep {
    const ATTRIBUTES: &'static [&'static str] = &[
        "to",
        "from",
        "sender_name",
        "host",
        "port",
        "username",
        "password",
        "subject",
        "content_type",
        "body",
        "cc",
        "bcc",
    ];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name {
            "to" => self.to = Some(convert::string_list(name, value)?),
            "from" => self.from = Some(convert::string(name, value)?),
            "sender_name" => self.sender_name = Some(convert::string(name, value)?),
            "host" => self.host = Some(convert::string(name, value)?),
            "port" => self.port = Some(convert::integer(name, value)?),
            "username" => self.username = Some(convert::string(name, value)?),
            "password" => self.password = Some(convert::string(name, value)?),
            "subject" => self.subject = Some(convert::string(name, value)?),
            "content_type" => self.content_type = Some(convert::string(name, value)?),
            "body" => self.body = Some(convert::string(name, value)?),
            "cc" => self.cc = Some(convert::string_list(name, value)?),
            "bcc" => self.bcc = Some(convert::string_list(name, value)?),
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        Inputs::new()
            .opt("to", &self.to)
            .opt("from", &self.from)
            .opt("sender_name", &self.sender_name)
            .opt("host", &self.host)
            .opt("port", &self.port)
            .opt("username", &self.username)
            .opt("password", &self.password)
            .opt("subject", &self.subject)
            .opt("content_type", &self.content_type)
            .opt("body", &self.body)
            .opt("cc", &self.cc)
            .opt("bcc", &self.bcc)
            .build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        if self.to.is_none() {
            Some("to")
        } else if self.host.is_none() {
            Some("host")
        } else {
            None
        }
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Some(port) = self.port {
            if !(1..=65535).contains(&port) {
                diags.push(
                    Diagnostic::validation("Invalid port", format!("Port {port} is outside 1..=65535."))
                        .with_subject(range.child("port")),
                );
            }
        }
        if self.to.as_ref().is_some_and(Vec::is_empty) {
            diags.push(
                Diagnostic::validation("Missing recipients", "The to list must not be empty.")
                    .with_subject(range.child("to")),
            );
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields_in_order() {
        let mut step = EmailStep::default();
        assert_eq!(step.missing_required(), Some("to"));
        step.set_value("to", Value::from("ops@example.com")).unwrap();
        assert_eq!(step.missing_required(), Some("host"));
        step.set_value("host", Value::from("smtp.example.com")).unwrap();
        assert_eq!(step.missing_required(), None);
    }

    #[test]
    fn test_port_range_validated() {
        let mut step = EmailStep::default();
        step.set_value("port", Value::from(70_000_i64)).unwrap();
        let diags = step.validate(&SourceRange::new(None, "step.email.e"));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_inputs_render_lists() {
        let mut step = EmailStep::default();
        step.set_value("cc", Value::from(vec!["a@x", "b@x"])).unwrap();
        assert_eq!(step.inputs()["cc"], Value::from(vec!["a@x", "b@x"]));
    }
}
