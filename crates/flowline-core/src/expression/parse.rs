//! Parsing of bare expressions and `${ ... }` string templates.
//!
//! Syntax is HCL's: `a-b` is one identifier, write `a - b` to subtract, and
//! `$${` escapes a literal `${`. Template directives (`%{ if }`) are rejected.

use std::collections::BTreeMap;
use std::str::FromStr;

use flowline_types::value::Value;
use hcl::expr::ObjectKey;
use hcl::template::{Element, Template};

use super::Expression;
use super::eval::from_hcl_number;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Syntax(#[from] hcl::Error),

    #[error("template directives are not supported")]
    Directive,
}

/// Parse a bare expression such as `step.http.s1.output.status == 200`.
pub fn parse_expression(text: &str) -> Result<Expression, ParseError> {
    let expr: hcl::Expression = text
        .parse::<hcl::edit::expr::Expression>()
        .map_err(hcl::Error::from)?
        .into();
    Ok(from_hcl(expr))
}

/// Parse a string template. Text without interpolations becomes a string
/// literal; a lone interpolation keeps the type of its value.
pub fn parse_template(text: &str) -> Result<Expression, ParseError> {
    let template = Template::from_str(text)?;
    let elements = template.elements();
    if elements.iter().any(|e| matches!(e, Element::Directive(_))) {
        return Err(ParseError::Directive);
    }
    if let [Element::Interpolation(interpolation)] = elements {
        return Ok(from_hcl(interpolation.expr.clone()));
    }
    let literal = elements
        .iter()
        .map(|e| match e {
            Element::Literal(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Option<String>>();
    Ok(match literal {
        Some(text) => Expression::Literal(Value::String(text)),
        None => Expression::Template(template),
    })
}

/// Constant expressions fold to literals.
fn from_hcl(expr: hcl::Expression) -> Expression {
    match static_value(&expr) {
        Some(value) => Expression::Literal(value),
        None => Expression::Hcl(expr),
    }
}

fn static_value(expr: &hcl::Expression) -> Option<Value> {
    match expr {
        hcl::Expression::Null => Some(Value::Null),
        hcl::Expression::Bool(b) => Some(Value::Bool(*b)),
        hcl::Expression::Number(n) => Some(from_hcl_number(n)),
        hcl::Expression::String(s) => Some(Value::String(s.clone())),
        hcl::Expression::Parenthesis(inner) => static_value(inner),
        hcl::Expression::Array(items) => items.iter().map(static_value).collect::<Option<Vec<_>>>().map(Value::List),
        hcl::Expression::Object(object) => object
            .iter()
            .map(|(key, value)| Some((static_key(key)?, static_value(value)?)))
            .collect::<Option<BTreeMap<_, _>>>()
            .map(Value::Map),
        _ => None,
    }
}

fn static_key(key: &ObjectKey) -> Option<String> {
    if let ObjectKey::Identifier(ident) = key {
        return Some(ident.as_str().to_string());
    }
    if let ObjectKey::Expression(hcl::Expression::String(s)) = key {
        return Some(s.clone());
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
