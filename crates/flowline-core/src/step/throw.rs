//! `throw` blocks: fail a step when a predicate over its result holds.

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use serde::{Deserialize, Serialize};

use super::convert;
use crate::block::Block;
use crate::expression::EvalContext;
use crate::resolve::{
    BlockContext, BodyValues, DependencySet, Outcome, Resolution, ResolutionContext, evaluate_body, resolve_body,
};

pub const ATTRIBUTES: &[&str] = &["if", "message"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThrowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_when: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when the body could not be resolved at definition time.
    #[serde(default)]
    pub unresolved: bool,
    #[serde(skip)]
    pub unresolved_body: Option<Block>,
}

impl ThrowConfig {
    fn from_values(values: &BodyValues, range: &SourceRange) -> Result<Self, Diagnostics> {
        let mut config = Self::default();
        let mut diags = Diagnostics::new();
        for (name, value) in values {
            let value = value.clone();
            let set = match name.as_str() {
                "if" => convert::boolean(name, value).map(|b| config.enabled_when = Some(b)),
                "message" if value.is_null() => Ok(()),
                "message" => convert::string(name, value).map(|s| config.message = Some(s)),
                _ => Ok(()),
            };
            if let Err(mismatch) = set {
                diags.push(mismatch.into_diagnostic(&range.child(name)));
            }
        }
        diags.into_result(config)
    }

    /// Decode one `throw` block.
    ///
    /// A body that must wait for run time still yields a config, flagged
    /// `unresolved` and carrying the raw block.
    pub fn decode(block: &Block, ctx: &ResolutionContext<'_>) -> Result<(Self, DependencySet), Diagnostics> {
        let mut diags = block.unsupported_attributes(ATTRIBUTES);
        if block.attribute("if").is_none() {
            diags.push(
                Diagnostic::error("Missing required argument", "The argument \"if\" is required.")
                    .with_subject(block.range.clone()),
            );
        }
        if !diags.is_empty() {
            return Err(diags);
        }

        let ctx = ctx.in_block(BlockContext::Throw);
        let Resolution { outcome, dependencies } = resolve_body(block, &ctx);
        match outcome {
            Outcome::Resolved(values) => Ok((Self::from_values(&values, &block.range)?, dependencies)),
            Outcome::Deferred => Ok((
                Self {
                    unresolved: true,
                    unresolved_body: Some(block.clone()),
                    ..Self::default()
                },
                dependencies,
            )),
            Outcome::Failed(diags) => Err(diags),
        }
    }

    /// The resolved form of this config under a runtime environment.
    pub fn resolve(&self, env: &EvalContext) -> Result<Self, Diagnostics> {
        match (&self.unresolved_body, self.unresolved) {
            (Some(block), true) => {
                let values = evaluate_body(block, env)?;
                Self::from_values(&values, &block.range)
            }
            _ => Ok(self.clone()),
        }
    }

    /// Whether this throw fires. Unresolved configs never fire.
    pub fn fires(&self) -> bool {
        !self.unresolved && self.enabled_when == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Expression, parse_template};
    use flowline_types::config::ResolverConfig;
    use flowline_types::value::Value;

    fn decode(block: &Block) -> Result<(ThrowConfig, DependencySet), Diagnostics> {
        let env = EvalContext::new();
        let cfg = ResolverConfig::default();
        ThrowConfig::decode(block, &ResolutionContext::new(&env, &cfg))
    }

    #[test]
    fn test_result_predicate_kept_unresolved() {
        let block = Block::new("throw", vec![])
            .with_attribute("if", parse_template("${result.status_code == 404}").unwrap())
            .with_attribute("message", Expression::literal("not found"));
        let (throw, deps) = decode(&block).unwrap();
        assert!(throw.unresolved);
        assert!(!throw.fires());
        assert!(deps.is_empty());

        let env = EvalContext::new().with_variable("result", Value::map([("status_code", Value::from(404_i64))]));
        let resolved = throw.resolve(&env).unwrap();
        assert!(resolved.fires());
        assert_eq!(resolved.message.as_deref(), Some("not found"));
    }

    #[test]
    fn test_static_throw_resolves() {
        let block = Block::new("throw", vec![]).with_attribute("if", Expression::literal(false));
        let (throw, _) = decode(&block).unwrap();
        assert!(!throw.unresolved);
        assert_eq!(throw.enabled_when, Some(false));
        assert_eq!(throw.resolve(&EvalContext::new()).unwrap(), throw);
    }

    #[test]
    fn test_step_reference_in_message_adds_edge() {
        let block = Block::new("throw", vec![])
            .with_attribute("if", Expression::literal(true))
            .with_attribute("message", parse_template("bad: ${step.http.probe.status}").unwrap());
        let (throw, deps) = decode(&block).unwrap();
        assert!(throw.unresolved);
        assert_eq!(deps.depends_on(), ["http.probe"]);
    }

    #[test]
    fn test_if_is_required() {
        let block = Block::new("throw", vec![]).with_attribute("message", Expression::literal("x"));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"if\" is required"), "got: {msg}");
    }
}
