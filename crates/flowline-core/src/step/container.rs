use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// Run a container from an image or from a build source.
///
/// The run timeout is the common step `timeout` attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_swap: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_swappiness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl StepPayload for ContainerStep {
    const ATTRIBUTES: &'static [&'static str] = &[
        "image",
        "source",
        "cmd",
        "entrypoint",
        "env",
        "cpu_shares",
        "memory",
        "memory_reservation",
        "memory_swap",
        "memory_swappiness",
        "read_only",
        "user",
        "workdir",
    ];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name {
            "image" => self.image = Some(convert::string(name, value)?),
            "source" => self.source = Some(convert::string(name, value)?),
            "cmd" => self.cmd = Some(convert::string_list(name, value)?),
            "entrypoint" => self.entrypoint = Some(convert::string_list(name, value)?),
            "env" => self.env = Some(convert::string_map(name, value)?),
            "cpu_shares" => self.cpu_shares = Some(convert::integer(name, value)?),
            "memory" => self.memory = Some(convert::integer(name, value)?),
            "memory_reservation" => self.memory_reservation = Some(convert::integer(name, value)?),
            "memory_swap" => self.memory_swap = Some(convert::integer(name, value)?),
            "memory_swappiness" => self.memory_swappiness = Some(convert::integer(name, value)?),
            "read_only" => self.read_only = Some(convert::boolean(name, value)?),
            "user" => self.user = Some(convert::string(name, value)?),
            "workdir" => self.workdir = Some(convert::string(name, value)?),
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        Inputs::new()
            .opt("image", &self.image)
            .opt("source", &self.source)
            .opt("cmd", &self.cmd)
            .opt("entrypoint", &self.entrypoint)
            .opt_map("env", &self.env)
            .opt("cpu_shares", &self.cpu_shares)
            .opt("memory", &self.memory)
            .opt("memory_reservation", &self.memory_reservation)
            .opt("memory_swap", &self.memory_swap)
            .opt("memory_swappiness", &self.memory_swappiness)
            .opt("read_only", &self.read_only)
            .opt("user", &self.user)
            .opt("workdir", &self.workdir)
            .build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        (self.image.is_none() && self.source.is_none()).then_some("image")
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if self.image.is_some() && self.source.is_some() {
            diags.push(
                Diagnostic::validation(
                    "Conflicting attributes",
                    "The image and source attributes are mutually exclusive.",
                )
                .with_subject(range.clone()),
            );
        }
        if let Some(swappiness) = self.memory_swappiness {
            if !(0..=100).contains(&swappiness) {
                diags.push(
                    Diagnostic::validation(
                        "Invalid memory_swappiness",
                        format!("memory_swappiness must be between 0 and 100, got {swappiness}."),
                    )
                    .with_subject(range.child("memory_swappiness")),
                );
            }
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> SourceRange {
        SourceRange::new(None, "step.container.c")
    }

    #[test]
    fn test_image_and_source_exclusive() {
        let mut step = ContainerStep::default();
        step.set_value("image", Value::from("alpine:3")).unwrap();
        assert!(step.validate(&range()).is_empty());

        step.set_value("source", Value::from("./build")).unwrap();
        let diags = step.validate(&range());
        assert_eq!(diags.len(), 1);
        let msg = diags.to_string();
        assert!(msg.contains("mutually exclusive"), "got: {msg}");
    }

    #[test]
    fn test_swappiness_bounds() {
        let mut step = ContainerStep::default();
        step.set_value("image", Value::from("alpine:3")).unwrap();
        step.set_value("memory_swappiness", Value::from(100_i64)).unwrap();
        assert!(step.validate(&range()).is_empty());
        step.set_value("memory_swappiness", Value::from(101_i64)).unwrap();
        assert_eq!(step.validate(&range()).len(), 1);
    }

    #[test]
    fn test_image_or_source_required() {
        let mut step = ContainerStep::default();
        assert_eq!(step.missing_required(), Some("image"));
        step.set_value("source", Value::from("./build")).unwrap();
        assert_eq!(step.missing_required(), None);
    }
}
