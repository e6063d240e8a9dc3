//! `output` blocks of pipelines and steps.

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;

use crate::block::Block;
use crate::expression::{EvalContext, Expression};
use crate::resolve::{DependencySet, Outcome, ResolutionContext, resolve_attribute};

pub const ATTRIBUTES: &[&str] = &["description", "value"];

/// A named output. `value` is set when it resolved at definition time,
/// otherwise `unresolved_value` holds the expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub name: String,
    pub description: Option<String>,
    pub value: Option<Value>,
    pub unresolved_value: Option<Expression>,
    pub dependencies: DependencySet,
    pub range: SourceRange,
}

impl PipelineOutput {
    pub fn decode(block: &Block, ctx: &ResolutionContext<'_>) -> Result<Self, Diagnostics> {
        let Some(name) = block.label(0) else {
            return Err(Diagnostic::error("Missing name for output", "An output block needs a name label.")
                .with_subject(block.range.clone())
                .into());
        };
        let mut diags = block.unsupported_attributes(ATTRIBUTES);
        let mut output = Self {
            name: name.to_string(),
            description: None,
            value: None,
            unresolved_value: None,
            dependencies: DependencySet::new(),
            range: block.range.clone(),
        };

        if let Some(attribute) = block.attribute("description") {
            match resolve_attribute(attribute, ctx).outcome {
                Outcome::Resolved(Value::String(text)) => output.description = Some(text),
                Outcome::Resolved(other) => diags.push(
                    Diagnostic::error(
                        "Incorrect attribute value type",
                        format!("The description must be a string, got {}.", other.type_name()),
                    )
                    .with_subject(attribute.range.clone()),
                ),
                Outcome::Deferred => diags.push(
                    Diagnostic::error(
                        "Invalid description",
                        "An output description cannot reference values known only at run time.",
                    )
                    .with_subject(attribute.range.clone()),
                ),
                Outcome::Failed(failed) => diags.extend(failed),
            }
        }

        match block.attribute("value") {
            None => diags.push(
                Diagnostic::error("Missing required argument", "The argument \"value\" is required.")
                    .with_subject(block.range.clone()),
            ),
            Some(attribute) => match resolve_attribute(attribute, ctx).merge_into(&mut output.dependencies) {
                Outcome::Resolved(value) => output.value = Some(value),
                Outcome::Deferred => output.unresolved_value = Some(attribute.expr.clone()),
                Outcome::Failed(failed) => diags.extend(failed),
            },
        }

        diags.into_result(output)
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved_value.is_none()
    }

    /// The output value, evaluating the retained expression if needed.
    pub fn evaluate(&self, env: &EvalContext) -> Result<Value, Diagnostics> {
        match (&self.value, &self.unresolved_value) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(expr)) => expr.evaluate(env).map_err(|d| d.with_subject(&self.range.child("value"))),
            (None, None) => Ok(Value::Null),
        }
    }

    pub fn depends_on(&self) -> &[String] {
        self.dependencies.depends_on()
    }

    pub fn credential_depends_on(&self) -> &[String] {
        self.dependencies.credential_depends_on()
    }
}
