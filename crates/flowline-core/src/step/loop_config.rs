//! The `loop` block: re-run a step until a predicate over its result holds.
//!
//! A loop body must reference something only known after an iteration
//! (`result`, `loop`, a step output). One that resolves at definition time
//! would never change between iterations and is rejected.

use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;

use super::StepSpec;
use crate::block::{Block, unsupported_attribute};
use crate::expression::{EvalContext, Expression};
use crate::resolve::{BlockContext, DependencySet, Outcome, Resolution, ResolutionContext, resolve_body};

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub until: Expression,
    /// Step attributes replaced on each iteration, by attribute name.
    pub overrides: BTreeMap<String, Expression>,
    pub range: SourceRange,
}

/// A loop body evaluated after one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopEvaluation {
    pub until: bool,
    pub overrides: BTreeMap<String, Value>,
}

impl LoopConfig {
    /// Decode a `loop` block for a step of kind `spec`.
    pub fn decode(
        block: &Block,
        spec: &StepSpec,
        ctx: &ResolutionContext<'_>,
    ) -> Result<(Self, DependencySet), Diagnostics> {
        let mut diags = Diagnostics::new();
        let mut until = None;
        let mut overrides = BTreeMap::new();
        for attribute in &block.attributes {
            if attribute.name == "until" {
                until = Some(attribute.expr.clone());
            } else if spec.accepts(&attribute.name) {
                overrides.insert(attribute.name.clone(), attribute.expr.clone());
            } else {
                diags.push(unsupported_attribute(attribute, "loop"));
            }
        }
        let Some(until) = until else {
            diags.push(
                Diagnostic::error("Missing required argument", "The argument \"until\" is required.")
                    .with_subject(block.range.clone()),
            );
            return Err(diags);
        };
        if !diags.is_empty() {
            return Err(diags);
        }

        let ctx = ctx.in_block(BlockContext::Loop);
        let Resolution { outcome, dependencies } = resolve_body(block, &ctx);
        match outcome {
            Outcome::Resolved(_) => Err(Diagnostic::validation(
                "Invalid loop block",
                "The loop block does not reference anything evaluated at run time, which may lead to infinite loop.",
            )
            .with_subject(block.range.clone())
            .into()),
            Outcome::Deferred => Ok((
                Self {
                    until,
                    overrides,
                    range: block.range.clone(),
                },
                dependencies,
            )),
            Outcome::Failed(diags) => Err(diags),
        }
    }

    /// Evaluate the body after an iteration.
    pub fn evaluate(&self, env: &EvalContext) -> Result<LoopEvaluation, Diagnostics> {
        let mut diags = Diagnostics::new();
        let until = match self.until.evaluate(env) {
            Ok(Value::Bool(b)) => Some(b),
            Ok(other) => {
                diags.push(
                    Diagnostic::error(
                        "Invalid loop condition",
                        format!("The until expression must produce a bool, got {}.", other.type_name()),
                    )
                    .with_subject(self.range.child("until")),
                );
                None
            }
            Err(e) => {
                diags.extend(e.with_subject(&self.range.child("until")));
                None
            }
        };
        let mut overrides = BTreeMap::new();
        for (name, expr) in &self.overrides {
            match expr.evaluate(env) {
                Ok(value) => {
                    overrides.insert(name.clone(), value);
                }
                Err(e) => diags.extend(e.with_subject(&self.range.child(name))),
            }
        }
        match until {
            Some(until) if diags.is_empty() => Ok(LoopEvaluation { until, overrides }),
            _ => Err(diags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_template;
    use flowline_types::config::ResolverConfig;
    use flowline_types::pipeline::StepKind;

    fn decode(block: &Block) -> Result<(LoopConfig, DependencySet), Diagnostics> {
        let env = EvalContext::new();
        let cfg = ResolverConfig::default();
        LoopConfig::decode(block, &StepSpec::new(StepKind::Http), &ResolutionContext::new(&env, &cfg))
    }

    #[test]
    fn test_fully_resolved_loop_rejected() {
        let block = Block::new("loop", vec![]).with_attribute("until", Expression::literal(false));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("may lead to infinite loop"), "got: {msg}");
    }

    #[test]
    fn test_loop_with_result_and_override() {
        let block = Block::new("loop", vec![])
            .with_attribute("until", parse_template("${loop.index >= 2}").unwrap())
            .with_attribute("url", parse_template("https://x/page/${loop.index + 1}").unwrap());
        let (config, deps) = decode(&block).unwrap();
        assert!(deps.is_empty());
        assert_eq!(config.overrides.len(), 1);

        let env = EvalContext::new().with_variable("loop", Value::map([("index", Value::from(2_i64))]));
        let eval = config.evaluate(&env).unwrap();
        assert!(eval.until);
        assert_eq!(eval.overrides["url"], Value::from("https://x/page/3"));
    }

    #[test]
    fn test_override_must_be_step_attribute() {
        let block = Block::new("loop", vec![])
            .with_attribute("until", parse_template("${result.done}").unwrap())
            .with_attribute("sql", Expression::literal("select 1"));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"sql\" is not expected"), "got: {msg}");
    }

    #[test]
    fn test_until_required() {
        let block = Block::new("loop", vec![]).with_attribute("url", parse_template("${result.next}").unwrap());
        let err = decode(&block).unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn test_non_bool_until_is_error() {
        let block = Block::new("loop", vec![]).with_attribute("until", parse_template("${result.count}").unwrap());
        let (config, _) = decode(&block).unwrap();
        let env = EvalContext::new().with_variable("result", Value::map([("count", Value::from(3_i64))]));
        let err = config.evaluate(&env).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("must produce a bool, got number"), "got: {msg}");
    }
}
