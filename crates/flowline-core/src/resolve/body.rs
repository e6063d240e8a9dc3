//! Block-level resolution for `loop`, `retry`, `throw` and `error` bodies.

use std::collections::BTreeMap;

use flowline_types::diagnostic::Diagnostics;
use flowline_types::value::Value;

use super::{DependencySet, Outcome, Resolution, ResolutionContext, resolve_attribute};
use crate::block::Block;
use crate::expression::EvalContext;

/// Resolved attribute values of a body, by attribute name.
pub type BodyValues = BTreeMap<String, Value>;

/// Resolve every attribute of `block` in `ctx.block` context.
///
/// The body is resolved as a unit: one failed attribute fails it, otherwise
/// one deferred attribute defers it and the caller keeps the raw block.
/// A failed body reports no dependencies.
pub fn resolve_body(block: &Block, ctx: &ResolutionContext<'_>) -> Resolution<BodyValues> {
    let mut values = BodyValues::new();
    let mut dependencies = DependencySet::new();
    let mut diagnostics = Diagnostics::new();
    let mut deferred = false;

    for attribute in &block.attributes {
        match resolve_attribute(attribute, ctx).merge_into(&mut dependencies) {
            Outcome::Resolved(value) => {
                values.insert(attribute.name.clone(), value);
            }
            Outcome::Deferred => deferred = true,
            Outcome::Failed(diags) => diagnostics.extend(diags),
        }
    }

    if !diagnostics.is_empty() {
        return Resolution::failed(diagnostics);
    }
    if deferred {
        tracing::debug!(
            block = %block.range,
            context = ctx.block.as_str(),
            "deferring block body"
        );
        return Resolution::deferred(dependencies);
    }
    Resolution {
        outcome: Outcome::Resolved(values),
        dependencies,
    }
}

/// Evaluate every attribute of a retained body against a runtime environment.
///
/// Unlike `resolve_body` nothing is deferred: an unknown symbol at this
/// point is an error.
pub fn evaluate_body(block: &Block, env: &EvalContext) -> Result<BodyValues, Diagnostics> {
    let mut values = BodyValues::new();
    let mut diagnostics = Diagnostics::new();
    for attribute in &block.attributes {
        match attribute.expr.evaluate(env) {
            Ok(value) => {
                values.insert(attribute.name.clone(), value);
            }
            Err(diags) => diagnostics.extend(diags.with_subject(&attribute.range)),
        }
    }
    diagnostics.into_result(values)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{EvalContext, Expression, parse_template};
    use crate::resolve::BlockContext;
    use flowline_types::config::ResolverConfig;

    fn resolve(block: &Block, context: BlockContext) -> Resolution<BodyValues> {
        let env = EvalContext::new();
        let config = ResolverConfig::default();
        let ctx = ResolutionContext::new(&env, &config).in_block(context);
        resolve_body(block, &ctx)
    }

    #[test]
    fn test_static_body_resolves() {
        let block = Block::new("retry", vec![])
            .with_attribute("max_attempts", Expression::literal(5_i64))
            .with_attribute("strategy", Expression::literal("linear"));
        let res = resolve(&block, BlockContext::Retry);
        let Outcome::Resolved(values) = res.outcome else {
            panic!("expected resolved");
        };
        assert_eq!(values["max_attempts"], Value::from(5_i64));
        assert_eq!(values["strategy"], Value::from("linear"));
    }

    #[test]
    fn test_one_deferred_attribute_defers_body() {
        let block = Block::new("throw", vec![])
            .with_attribute("if", parse_template("${result.status_code == 500}").unwrap())
            .with_attribute("message", parse_template("failed after ${step.sleep.wait.duration}").unwrap());
        let res = resolve(&block, BlockContext::Throw);
        assert!(res.is_deferred());
        assert_eq!(res.dependencies.depends_on(), ["sleep.wait"]);
    }

    #[test]
    fn test_evaluate_body_with_runtime_result() {
        let block = Block::new("throw", vec![])
            .with_attribute("if", parse_template("${result.status_code == 500}").unwrap());
        let env = EvalContext::new().with_variable("result", Value::map([("status_code", Value::from(500_i64))]));
        let values = evaluate_body(&block, &env).unwrap();
        assert_eq!(values["if"], Value::Bool(true));

        let err = evaluate_body(&block, &EvalContext::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("throw.if"), "got: {msg}");
    }

    #[test]
    fn test_failure_wins_over_deferral() {
        let block = Block::new("error", vec![])
            .with_attribute("if", parse_template("${result.status_code == 500}").unwrap());
        let res = resolve(&block, BlockContext::Error);
        assert!(matches!(res.outcome, Outcome::Failed(_)));
    }
}
