use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::pipeline::HttpMethod;
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// An HTTP request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Kept verbatim; `validate` checks membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl HttpStep {
    /// The request method, `get` when unset.
    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| HttpMethod::Get.to_string())
    }
}

impl StepPayload for HttpStep {
    const ATTRIBUTES: &'static [&'static str] = &[
        "url",
        "method",
        "request_body",
        "request_headers",
        "insecure",
        "ca_cert_pem",
        "request_timeout_ms",
        "basic_auth.username",
        "basic_auth.password",
    ];
    const BLOCKS: &'static [&'static str] = &["basic_auth"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name {
            "url" => self.url = Some(convert::string(name, value)?),
            "method" => self.method = Some(convert::string(name, value)?),
            "request_body" => self.request_body = Some(value),
            "request_headers" => self.request_headers = Some(convert::map(name, value)?),
            "insecure" => self.insecure = Some(convert::boolean(name, value)?),
            "ca_cert_pem" => self.ca_cert_pem = Some(convert::string(name, value)?),
            "request_timeout_ms" => self.request_timeout_ms = Some(convert::integer(name, value)?),
            "basic_auth.username" => {
                self.basic_auth.get_or_insert_with(BasicAuth::default).username =
                    Some(convert::string(name, value)?);
            }
            "basic_auth.password" => {
                self.basic_auth.get_or_insert_with(BasicAuth::default).password =
                    Some(convert::string(name, value)?);
            }
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        let mut inputs = Inputs::new()
            .opt("url", &self.url)
            .set("method", self.method())
            .opt("request_body", &self.request_body)
            .opt_map("request_headers", &self.request_headers)
            .opt("insecure", &self.insecure)
            .opt("ca_cert_pem", &self.ca_cert_pem)
            .opt("request_timeout_ms", &self.request_timeout_ms);
        if let Some(auth) = &self.basic_auth {
            let auth = Inputs::new()
                .opt("username", &auth.username)
                .opt("password", &auth.password)
                .build();
            inputs = inputs.set("basic_auth", Value::Map(auth));
        }
        inputs.build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        self.url.is_none().then_some("url")
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if let Some(method) = &self.method {
            if method.to_lowercase().parse::<HttpMethod>().is_err() {
                diags.push(
                    Diagnostic::validation(
                        "Invalid http method",
                        format!(
                            "Unsupported method \"{method}\", expected one of: {}.",
                            HttpMethod::expected()
                        ),
                    )
                    .with_subject(range.child("method")),
                );
            }
        }
        if let Some(timeout) = self.request_timeout_ms {
            if timeout < 0 {
                diags.push(
                    Diagnostic::validation("Invalid request timeout", "request_timeout_ms must not be negative.")
                        .with_subject(range.child("request_timeout_ms")),
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
        SourceRange::new(None, "step.http.s")
    }

    #[test]
    fn test_method_defaults_to_get() {
        let mut step = HttpStep::default();
        step.set_value("url", Value::from("https://example.com")).unwrap();
        let inputs = step.inputs();
        assert_eq!(inputs["method"], Value::from("get"));
        assert_eq!(inputs["url"], Value::from("https://example.com"));
    }

    #[test]
    fn test_method_validation_case_insensitive() {
        let mut step = HttpStep::default();
        step.set_value("method", Value::from("POST")).unwrap();
        assert!(step.validate(&range()).is_empty());

        step.set_value("method", Value::from("fetch")).unwrap();
        let diags = step.validate(&range());
        assert_eq!(diags.len(), 1);
        let msg = diags.to_string();
        assert!(msg.contains("get, post, put, patch, delete, head, options"), "got: {msg}");
    }

    #[test]
    fn test_basic_auth_nested_values() {
        let mut step = HttpStep::default();
        step.set_value("basic_auth.username", Value::from("admin")).unwrap();
        let inputs = step.inputs();
        assert_eq!(inputs["basic_auth"].get("username"), Some(&Value::from("admin")));
        assert!(inputs["basic_auth"].get("password").is_none());
    }

    #[test]
    fn test_url_required() {
        assert_eq!(HttpStep::default().missing_required(), Some("url"));
    }
}
