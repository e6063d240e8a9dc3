//! Diagnostic classification: recoverable (defer) or not.

use flowline_types::diagnostic::{Diagnostic, DiagnosticKind, Diagnostics};
use flowline_types::pipeline::DependencyEdge;

use super::{BlockContext, ResolutionContext};
use crate::expression::{Expression, Reference};

/// Verdict for a single diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The attribute can wait; the edges say what for (possibly nothing).
    Recoverable(Vec<DependencyEdge>),
    /// A real error. The optional diagnostic explains a malformed reference
    /// and is reported after the evaluator's own diagnostics.
    Unrecoverable(Option<Diagnostic>),
}

/// Verdict for a whole batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchClassification {
    pub recoverable: bool,
    pub edges: Vec<DependencyEdge>,
    /// Diagnostics to append to the evaluator's batch.
    pub extra: Diagnostics,
}

/// Classify one evaluation diagnostic against the expression that produced it.
pub fn classify(diagnostic: &Diagnostic, expr: &Expression, ctx: &ResolutionContext<'_>) -> Classification {
    let Some(symbol) = diagnostic.unknown_symbol(ctx.config.match_diagnostic_text) else {
        return Classification::Unrecoverable(None);
    };
    match symbol {
        "step" => step_edges(expr),
        "credential" => credential_edges(expr),
        "each" | "param" | "loop" => Classification::Recoverable(Vec::new()),
        "retry" if ctx.block.is_block() => Classification::Recoverable(Vec::new()),
        "result" if ctx.block.allows_result() => Classification::Recoverable(Vec::new()),
        "self" if ctx.block == BlockContext::Trigger => Classification::Recoverable(Vec::new()),
        _ => Classification::Unrecoverable(None),
    }
}

/// Classify a batch. It is recoverable only when every diagnostic is.
/// Each unknown symbol is walked once.
pub fn classify_all(
    diagnostics: &Diagnostics,
    expr: &Expression,
    ctx: &ResolutionContext<'_>,
) -> BatchClassification {
    let mut batch = BatchClassification {
        recoverable: true,
        ..BatchClassification::default()
    };
    let mut seen: Vec<&str> = Vec::new();
    for diagnostic in diagnostics {
        if let Some(symbol) = diagnostic.unknown_symbol(ctx.config.match_diagnostic_text) {
            if seen.contains(&symbol) {
                continue;
            }
            seen.push(symbol);
        }
        match classify(diagnostic, expr, ctx) {
            Classification::Recoverable(edges) => batch.edges.extend(edges),
            Classification::Unrecoverable(extra) => {
                batch.recoverable = false;
                if let Some(extra) = extra {
                    batch.extra.push(extra);
                }
            }
        }
    }
    batch
}

fn references_with_root<'e>(expr: &'e Expression, root: &'e str) -> impl Iterator<Item = Reference> + 'e {
    expr.variables().into_iter().filter(move |r| r.root == root)
}

/// `step.<kind>.<name>...` needs at least three segments.
fn step_edges(expr: &Expression) -> Classification {
    let mut edges = Vec::new();
    for reference in references_with_root(expr, "step") {
        match (reference.segment(1), reference.segment(2)) {
            (Some(kind), Some(name)) => edges.push(DependencyEdge::step(&kind, &name)),
            _ => return Classification::Unrecoverable(Some(malformed(&reference, "step", 3))),
        }
    }
    Classification::Recoverable(edges)
}

/// `credential.<kind>` depends on a credential chosen at run time;
/// `credential.<kind>.<name>` on a named one.
fn credential_edges(expr: &Expression) -> Classification {
    let mut edges = Vec::new();
    for reference in references_with_root(expr, "credential") {
        match (reference.segment(1), reference.segment(2)) {
            (Some(kind), Some(name)) => edges.push(DependencyEdge::credential(&kind, &name)),
            (Some(kind), None) => edges.push(DependencyEdge::dynamic_credential(&kind)),
            _ => return Classification::Unrecoverable(Some(malformed(&reference, "credential", 2))),
        }
    }
    Classification::Recoverable(edges)
}

fn malformed(reference: &Reference, root: &str, min_segments: usize) -> Diagnostic {
    let reference = reference.to_string();
    Diagnostic::error(
        format!("Invalid {root} reference"),
        format!(
            "A reference to a {root} must have at least {min_segments} parts, e.g. {}; got \"{reference}\".",
            if root == "step" {
                "step.<type>.<name>"
            } else {
                "credential.<type>"
            }
        ),
    )
    .with_kind(DiagnosticKind::MalformedReference { reference })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{EvalContext, parse_expression};
    use crate::resolve::BlockContext;
    use flowline_types::config::ResolverConfig;

    fn classify_expr(text: &str, block: BlockContext, config: &ResolverConfig) -> BatchClassification {
        let env = EvalContext::new();
        let ctx = ResolutionContext::new(&env, config).in_block(block);
        let expr = parse_expression(text).unwrap();
        let diags = expr.evaluate(&env).unwrap_err();
        classify_all(&diags, &expr, &ctx)
    }

    #[test]
    fn test_step_reference_yields_edge() {
        let batch = classify_expr("step.http.s1.output", BlockContext::Attribute, &ResolverConfig::default());
        assert!(batch.recoverable);
        assert_eq!(batch.edges, vec![DependencyEdge::step("http", "s1")]);
    }

    #[test]
    fn test_short_step_reference_is_unrecoverable() {
        let batch = classify_expr("step.http", BlockContext::Attribute, &ResolverConfig::default());
        assert!(!batch.recoverable);
        assert_eq!(batch.extra.len(), 1);
        let extra = batch.extra.iter().next().unwrap();
        assert!(matches!(&extra.kind, DiagnosticKind::MalformedReference { reference } if reference == "step.http"));
    }

    #[test]
    fn test_credential_dynamic_and_named() {
        let batch = classify_expr("credential.aws[param.x].env", BlockContext::Attribute, &ResolverConfig::default());
        assert!(batch.recoverable);
        assert_eq!(batch.edges, vec![DependencyEdge::dynamic_credential("aws")]);

        let batch = classify_expr("credential.aws.prod.env", BlockContext::Attribute, &ResolverConfig::default());
        assert_eq!(batch.edges, vec![DependencyEdge::credential("aws", "prod")]);

        let batch = classify_expr(r#"credential.aws["prod"]"#, BlockContext::Attribute, &ResolverConfig::default());
        assert_eq!(batch.edges, vec![DependencyEdge::credential("aws", "prod")]);
    }

    #[test]
    fn test_bare_credential_is_unrecoverable() {
        let batch = classify_expr("credential", BlockContext::Attribute, &ResolverConfig::default());
        assert!(!batch.recoverable);
    }

    #[test]
    fn test_runtime_symbols_recoverable_without_edges() {
        for text in ["each.value", "param.url", "loop.index"] {
            let batch = classify_expr(text, BlockContext::Attribute, &ResolverConfig::default());
            assert!(batch.recoverable, "{text}");
            assert!(batch.edges.is_empty(), "{text}");
        }
    }

    #[test]
    fn test_retry_only_in_blocks() {
        let config = ResolverConfig::default();
        assert!(!classify_expr("retry.attempt", BlockContext::Attribute, &config).recoverable);
        assert!(classify_expr("retry.attempt", BlockContext::Error, &config).recoverable);
    }

    #[test]
    fn test_result_only_in_loop_retry_throw() {
        let config = ResolverConfig::default();
        for block in [BlockContext::Loop, BlockContext::Retry, BlockContext::Throw] {
            assert!(classify_expr("result.status", block, &config).recoverable);
        }
        assert!(!classify_expr("result.status", BlockContext::Error, &config).recoverable);
        assert!(!classify_expr("result.status", BlockContext::Attribute, &config).recoverable);
    }

    #[test]
    fn test_self_only_in_triggers() {
        let config = ResolverConfig::default();
        assert!(classify_expr("self.request_body", BlockContext::Trigger, &config).recoverable);
        assert!(!classify_expr("self.request_body", BlockContext::Attribute, &config).recoverable);
        assert!(!classify_expr("retry.attempt", BlockContext::Trigger, &config).recoverable);
    }

    #[test]
    fn test_unknown_symbol_is_unrecoverable() {
        let batch = classify_expr("nope.x", BlockContext::Attribute, &ResolverConfig::default());
        assert!(!batch.recoverable);
        assert!(batch.extra.is_empty());
    }

    #[test]
    fn test_batch_with_one_bad_diagnostic_is_unrecoverable() {
        let batch = classify_expr("step.http.a.x == nope", BlockContext::Attribute, &ResolverConfig::default());
        assert!(!batch.recoverable);
    }

    #[test]
    fn test_detail_text_matching_can_be_disabled() {
        let env = EvalContext::new();
        let expr = parse_expression("each.value").unwrap();
        let legacy: Diagnostics = Diagnostic::error("Unknown variable", "There is no variable named \"each\".").into();

        let config = ResolverConfig::default();
        let ctx = ResolutionContext::new(&env, &config);
        assert!(classify_all(&legacy, &expr, &ctx).recoverable);

        let strict = ResolverConfig {
            match_diagnostic_text: false,
            ..ResolverConfig::default()
        };
        let ctx = ResolutionContext::new(&env, &strict);
        assert!(!classify_all(&legacy, &expr, &ctx).recoverable);
    }
}
