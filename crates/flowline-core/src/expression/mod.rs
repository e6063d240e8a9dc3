//! Attribute expressions on top of HCL.
//!
//! Attribute values in a pipeline document are either plain YAML scalars or
//! strings carrying `${ ... }` interpolations. Interpolations are parsed and
//! evaluated by the `hcl` crate; this module adds what resolution needs on
//! top: the references an expression makes (`variables`), and composition of
//! YAML sequences and mappings whose elements are expressions.
//!
//! Every root symbol missing from the environment is reported in one
//! `Diagnostics` batch before anything is evaluated, whichever branch of a
//! conditional it sits in. Resolution relies on this to infer all
//! dependencies of an attribute at once.

mod eval;
mod parse;

use std::fmt;

use flowline_types::value::Value;
use hcl::expr::{ObjectKey, Operation, TemplateExpr, TraversalOperator};
use hcl::template::{Element, Template};

pub use eval::EvalContext;
pub use parse::{ParseError, parse_expression, parse_template};

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A constant decoded straight from the document.
    Literal(Value),
    /// A string template rendering to a string.
    Template(Template),
    /// Any other HCL expression. A template made of a single interpolation
    /// lands here so its value keeps its type.
    Hcl(hcl::Expression),
    /// A YAML sequence with at least one non-constant element.
    Tuple(Vec<Expression>),
    /// A YAML mapping with at least one non-constant value.
    Object(Vec<(String, Expression)>),
}

/// A root symbol followed by static attribute or literal index segments,
/// e.g. `step.http.s1.output["k"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub path: Vec<String>,
}

impl Reference {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path: Vec::new(),
        }
    }

    /// Number of segments including the root.
    pub fn segment_count(&self) -> usize {
        self.path.len() + 1
    }

    /// Segment `n`; 0 is the root.
    pub fn segment(&self, n: usize) -> Option<String> {
        if n == 0 {
            return Some(self.root.clone());
        }
        self.path.get(n - 1).cloned()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    /// True when the expression is a constant.
    pub fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    /// References made by the expression, in source order.
    ///
    /// A computed index ends a reference: `credential.aws[param.x].env`
    /// yields `credential.aws` and `param.x`.
    pub fn variables(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        match self {
            Expression::Literal(_) => {}
            Expression::Template(template) => collect_template(template, &mut out),
            Expression::Hcl(expr) => collect(expr, &mut out),
            Expression::Tuple(items) => {
                for item in items {
                    out.extend(item.variables());
                }
            }
            Expression::Object(entries) => {
                for (_, value) in entries {
                    out.extend(value.variables());
                }
            }
        }
        out
    }

    /// Distinct root symbols referenced by the expression.
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = Vec::new();
        for reference in self.variables() {
            if !roots.contains(&reference.root) {
                roots.push(reference.root);
            }
        }
        roots
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Literal(value)
    }
}

// ---------------------------------------------------------------------------
// Reference collection
// ---------------------------------------------------------------------------

fn collect(expr: &hcl::Expression, out: &mut Vec<Reference>) {
    match expr {
        hcl::Expression::Variable(var) => out.push(Reference::new(var.as_str())),
        hcl::Expression::Traversal(traversal) => collect_traversal(traversal, out),
        hcl::Expression::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        hcl::Expression::Object(object) => {
            for (key, value) in object {
                if let ObjectKey::Expression(key) = key {
                    collect(key, out);
                }
                collect(value, out);
            }
        }
        hcl::Expression::TemplateExpr(template) => collect_template_expr(template, out),
        hcl::Expression::FuncCall(call) => {
            for arg in &call.args {
                collect(arg, out);
            }
        }
        hcl::Expression::Parenthesis(inner) => collect(inner, out),
        hcl::Expression::Conditional(cond) => {
            collect(&cond.cond_expr, out);
            collect(&cond.true_expr, out);
            collect(&cond.false_expr, out);
        }
        hcl::Expression::Operation(op) => match &**op {
            Operation::Unary(unary) => collect(&unary.expr, out),
            Operation::Binary(binary) => {
                collect(&binary.lhs_expr, out);
                collect(&binary.rhs_expr, out);
            }
        },
        hcl::Expression::ForExpr(for_expr) => {
            collect(&for_expr.collection_expr, out);
            let mut body = Vec::new();
            if let Some(key_expr) = &for_expr.key_expr {
                collect(key_expr, &mut body);
            }
            collect(&for_expr.value_expr, &mut body);
            if let Some(cond_expr) = &for_expr.cond_expr {
                collect(cond_expr, &mut body);
            }
            let is_local = |root: &str| {
                for_expr.value_var.as_str() == root
                    || for_expr.key_var.as_ref().is_some_and(|k| k.as_str() == root)
            };
            out.extend(body.into_iter().filter(|r| !is_local(&r.root)));
        }
        _ => {}
    }
}

fn collect_traversal(traversal: &hcl::expr::Traversal, out: &mut Vec<Reference>) {
    let mut current = match &traversal.expr {
        hcl::Expression::Variable(var) => Some(Reference::new(var.as_str())),
        other => {
            collect(other, out);
            None
        }
    };
    for operator in &traversal.operators {
        match operator {
            TraversalOperator::GetAttr(name) => {
                if let Some(reference) = current.as_mut() {
                    reference.path.push(name.as_str().to_string());
                }
            }
            TraversalOperator::LegacyIndex(index) => {
                if let Some(reference) = current.as_mut() {
                    reference.path.push(index.to_string());
                }
            }
            TraversalOperator::Index(key) => match (current.as_mut(), static_key(key)) {
                (Some(reference), Some(key)) => reference.path.push(key),
                _ => {
                    out.extend(current.take());
                    collect(key, out);
                }
            },
            _ => out.extend(current.take()),
        }
    }
    out.extend(current);
}

fn collect_template_expr(template: &TemplateExpr, out: &mut Vec<Reference>) {
    if let Ok(template) = Template::from_expr(template) {
        collect_template(&template, out);
    }
}

fn collect_template(template: &Template, out: &mut Vec<Reference>) {
    for element in template.elements() {
        if let Element::Interpolation(interpolation) = element {
            collect(&interpolation.expr, out);
        }
    }
}

/// An index key known without evaluation.
fn static_key(key: &hcl::Expression) -> Option<String> {
    match key {
        hcl::Expression::String(s) => Some(s.clone()),
        hcl::Expression::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
