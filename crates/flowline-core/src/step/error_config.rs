//! The `error` block of a step.

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use serde::{Deserialize, Serialize};

use super::convert;
use crate::block::Block;
use crate::expression::EvalContext;
use crate::resolve::{BlockContext, BodyValues, Outcome, Resolution, ResolutionContext, evaluate_body, resolve_body};

pub const ATTRIBUTES: &[&str] = &["if", "ignore", "retries"];

/// How a step failure is handled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_condition: Option<bool>,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub retries: i64,
}

impl ErrorConfig {
    pub fn from_values(values: &BodyValues, range: &SourceRange) -> Result<Self, Diagnostics> {
        let mut config = Self::default();
        let mut diags = Diagnostics::new();
        for (name, value) in values {
            let value = value.clone();
            let set = match name.as_str() {
                "if" if value.is_null() => Ok(()),
                "if" => convert::boolean(name, value).map(|b| config.if_condition = Some(b)),
                "ignore" => convert::boolean(name, value).map(|b| config.ignore = b),
                "retries" => convert::integer(name, value).map(|n| config.retries = n),
                _ => Ok(()),
            };
            if let Err(mismatch) = set {
                diags.push(mismatch.into_diagnostic(&range.child(name)));
            }
        }
        if config.retries < 0 {
            diags.push(
                Diagnostic::validation("Invalid error configuration", "retries must not be negative.")
                    .with_subject(range.child("retries")),
            );
        }
        diags.into_result(config)
    }

    /// Whether the failure should be swallowed.
    pub fn ignores(&self) -> bool {
        self.ignore && self.if_condition != Some(false)
    }

    /// Resolve an `error` block at definition time.
    pub fn decode(block: &Block, ctx: &ResolutionContext<'_>) -> Resolution<Self> {
        let unsupported = block.unsupported_attributes(ATTRIBUTES);
        if !unsupported.is_empty() {
            return Resolution::failed(unsupported);
        }

        let ctx = ctx.in_block(BlockContext::Error);
        let Resolution { outcome, dependencies } = resolve_body(block, &ctx);
        match outcome {
            Outcome::Resolved(values) => match Self::from_values(&values, &block.range) {
                Ok(config) => Resolution {
                    outcome: Outcome::Resolved(config),
                    dependencies,
                },
                Err(diags) => Resolution::failed(diags),
            },
            Outcome::Deferred => Resolution::deferred(dependencies),
            Outcome::Failed(diags) => Resolution::failed(diags),
        }
    }

    /// Re-decode a retained `error` block against a runtime environment.
    pub fn resolve(block: &Block, env: &EvalContext) -> Result<Self, Diagnostics> {
        let values = evaluate_body(block, env)?;
        Self::from_values(&values, &block.range)
    }
}
