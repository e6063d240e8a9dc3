//! Single-attribute resolution.

use flowline_types::diagnostic::SourceRange;

use super::{DependencySet, Resolution, ResolutionContext, classify_all};
use crate::block::Attribute;
use crate::expression::Expression;

/// Resolve one attribute at definition time.
pub fn resolve_attribute(attribute: &Attribute, ctx: &ResolutionContext<'_>) -> Resolution {
    resolve_expression(&attribute.expr, &attribute.range, ctx)
}

/// Resolve an expression located at `range`.
///
/// Any reference rooted at `param` defers the expression even when the
/// environment could evaluate it: params are bound per execution.
pub fn resolve_expression(
    expr: &Expression,
    range: &SourceRange,
    ctx: &ResolutionContext<'_>,
) -> Resolution {
    let forced = expr.variables().iter().any(|t| t.root == "param");

    let diagnostics = match expr.evaluate(ctx.env) {
        Ok(value) if !forced => return Resolution::resolved(value),
        Ok(_) => {
            tracing::debug!(subject = %range, "deferring param-dependent expression");
            return Resolution::deferred(DependencySet::new());
        }
        Err(diagnostics) => diagnostics,
    };

    let batch = classify_all(&diagnostics, expr, ctx);
    if !batch.recoverable {
        let mut diagnostics = diagnostics.with_subject(range);
        diagnostics.extend(batch.extra.with_subject(range));
        return Resolution::failed(diagnostics);
    }

    let dependencies: DependencySet = batch.edges.into_iter().collect();
    tracing::debug!(
        subject = %range,
        context = ctx.block.as_str(),
        depends_on = ?dependencies.depends_on(),
        credential_depends_on = ?dependencies.credential_depends_on(),
        "deferring expression"
    );
    Resolution::deferred(dependencies)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
