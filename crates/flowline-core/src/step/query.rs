use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use super::StepPayload;
use super::convert::{self, Converted, Inputs};

/// Run a SQL query against a database connection string.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

impl StepPayload for QueryStep {
    const ATTRIBUTES: &'static [&'static str] = &["sql", "database", "args"];

    fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        match name {
            "sql" => self.sql = Some(convert::string(name, value)?),
            "database" => self.database = Some(convert::string(name, value)?),
            "args" => self.args = Some(convert::list(name, value)?),
            _ => {}
        }
        Ok(())
    }

    fn inputs(&self) -> BTreeMap<String, Value> {
        Inputs::new()
            .opt("sql", &self.sql)
            .opt("database", &self.database)
            .opt("args", &self.args)
            .build()
    }

    fn missing_required(&self) -> Option<&'static str> {
        if self.sql.is_none() {
            Some("sql")
        } else if self.database.is_none() {
            Some("database")
        } else {
            None
        }
    }

    fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if self.sql.as_deref().is_some_and(|sql| sql.trim().is_empty()) {
            diags.push(
                Diagnostic::validation("Empty query", "The sql attribute must not be empty.")
                    .with_subject(range.child("sql")),
            );
        }
        diags
    }
}
