//! Expression evaluation against an environment of named variables.

use std::collections::BTreeMap;

use flowline_types::diagnostic::{Diagnostic, Diagnostics};
use flowline_types::output::Output;
use flowline_types::value::Value;
use hcl::eval::{Context, ErrorKind, Evaluate};

use super::Expression;

// ---------------------------------------------------------------------------
// EvalContext
// ---------------------------------------------------------------------------

/// The root symbols visible to an expression.
///
/// At definition time this usually holds only static values (`var`,
/// `pipeline`); the execution engine adds `step`, `each`, `param`, `result`
/// and friends as they become known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    variables: BTreeMap<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_variable(name, value);
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Make a step's output visible as `step.<kind>.<name>`.
    pub fn insert_step_output(&mut self, kind: &str, name: &str, output: &Output) {
        for key in output.shadowed_data_keys() {
            tracing::warn!(step = %format!("{kind}.{name}"), key, "output data entry shadowed by engine value");
        }
        let steps = self
            .variables
            .entry("step".to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(steps, Value::Map(_)) {
            *steps = Value::Map(BTreeMap::new());
        }
        if let Value::Map(kinds) = steps {
            let by_name = kinds
                .entry(kind.to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(by_name, Value::Map(_)) {
                *by_name = Value::Map(BTreeMap::new());
            }
            if let Value::Map(by_name) = by_name {
                by_name.insert(name.to_string(), output.to_value());
            }
        }
    }

    pub fn with_step_output(mut self, kind: &str, name: &str, output: &Output) -> Self {
        self.insert_step_output(kind, name, output);
        self
    }

    /// Bind `result` to the output of the step that just ran.
    pub fn with_result(self, output: &Output) -> Self {
        self.with_variable("result", output.to_value())
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expression {
    /// Evaluate the expression.
    ///
    /// Unknown root symbols are reported all together and before evaluation,
    /// so a reference in an untaken conditional branch is still reported.
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Value, Diagnostics> {
        if let Expression::Literal(value) = self {
            return Ok(value.clone());
        }
        let unknown: Diagnostics = self
            .roots()
            .iter()
            .filter(|root| !ctx.has_variable(root))
            .map(|root| Diagnostic::unknown_variable(root))
            .collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }

        let mut hcl_ctx = Context::new();
        for (name, value) in &ctx.variables {
            hcl_ctx.declare_var(name.as_str(), to_hcl(value));
        }
        self.eval(&hcl_ctx)
    }

    fn eval(&self, ctx: &Context<'_>) -> Result<Value, Diagnostics> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Hcl(expr) => expr
                .evaluate(ctx)
                .map(from_hcl)
                .map_err(|err| diagnostic(&err).into()),
            Expression::Template(template) => template
                .evaluate(ctx)
                .map(Value::String)
                .map_err(|err| diagnostic(&err).into()),
            Expression::Tuple(items) => {
                let mut diags = Diagnostics::new();
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item.eval(ctx) {
                        Ok(value) => values.push(value),
                        Err(d) => diags.extend(d),
                    }
                }
                if diags.is_empty() { Ok(Value::List(values)) } else { Err(diags) }
            }
            Expression::Object(entries) => {
                let mut diags = Diagnostics::new();
                let mut values = BTreeMap::new();
                for (key, item) in entries {
                    match item.eval(ctx) {
                        Ok(value) => {
                            values.insert(key.clone(), value);
                        }
                        Err(d) => diags.extend(d),
                    }
                }
                if diags.is_empty() { Ok(Value::Map(values)) } else { Err(diags) }
            }
        }
    }
}

/// Translate an HCL evaluation error. An undefined variable becomes the
/// typed unknown-variable diagnostic resolution classifies on.
fn diagnostic(err: &hcl::eval::Error) -> Diagnostic {
    let summary = match err.kind() {
        ErrorKind::UndefinedVar(name) => return Diagnostic::unknown_variable(name.as_str()),
        ErrorKind::NoSuchKey(..) => "Unsupported attribute",
        ErrorKind::Index(..) => "Invalid index",
        ErrorKind::UnaryOp(..) | ErrorKind::BinaryOp(..) => "Invalid operand",
        ErrorKind::Unexpected(..) => "Incorrect value type",
        ErrorKind::UndefinedFunc(..) => "Call to unknown function",
        _ => "Invalid expression",
    };
    Diagnostic::error(summary, err.to_string())
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

/// Whole numbers cross as integers so they render without a fraction.
fn to_hcl(value: &Value) -> hcl::Value {
    match value {
        Value::Null => hcl::Value::Null,
        Value::Bool(b) => hcl::Value::Bool(*b),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => hcl::Value::Number(hcl::Number::from(*n as i64)),
        Value::Number(n) => hcl::Number::from_f64(*n).map_or(hcl::Value::Null, hcl::Value::Number),
        Value::String(s) => hcl::Value::String(s.clone()),
        Value::List(items) => hcl::Value::Array(items.iter().map(to_hcl).collect()),
        Value::Map(map) => hcl::Value::Object(map.iter().map(|(k, v)| (k.clone(), to_hcl(v))).collect()),
    }
}

fn from_hcl(value: hcl::Value) -> Value {
    match value {
        hcl::Value::Null => Value::Null,
        hcl::Value::Bool(b) => Value::Bool(b),
        hcl::Value::Number(n) => from_hcl_number(&n),
        hcl::Value::String(s) => Value::String(s),
        hcl::Value::Array(items) => Value::List(items.into_iter().map(from_hcl).collect()),
        hcl::Value::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, from_hcl(v))).collect()),
    }
}

pub(super) fn from_hcl_number(n: &hcl::Number) -> Value {
    n.as_f64().map_or(Value::Null, Value::Number)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_expression, parse_template};
    use flowline_types::diagnostic::DiagnosticKind;

    fn ctx() -> EvalContext {
        EvalContext::new()
            .with_variable("var", Value::map([("host", Value::from("example.com")), ("flag", Value::Bool(false))]))
            .with_variable("items", Value::from(vec!["a", "b"]))
    }

    #[test]
    fn test_template_renders() {
        let expr = parse_template("https://${var.host}/x").unwrap();
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::from("https://example.com/x"));
    }

    #[test]
    fn test_lone_interpolation_keeps_type() {
        let expr = parse_template("${items}").unwrap();
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_whole_numbers_render_without_fraction() {
        let ctx = ctx().with_variable("page", 2_i64);
        let expr = parse_template("/page/${page + 1}").unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::from("/page/3"));
    }

    #[test]
    fn test_unknown_roots_all_reported() {
        let expr = parse_template("${step.http.a.x}-${each.value}").unwrap();
        let diags = expr.evaluate(&ctx()).unwrap_err();
        let names: Vec<_> = diags.iter().filter_map(|d| d.unknown_symbol(false)).collect();
        assert_eq!(names, vec!["step", "each"]);
        assert!(matches!(diags.iter().next().unwrap().kind, DiagnosticKind::UnknownVariable { .. }));
    }

    #[test]
    fn test_untaken_branch_reference_reported() {
        let expr = parse_template(r#"${var.flag ? step.http.a.url : "fallback"}"#).unwrap();
        let diags = expr.evaluate(&ctx()).unwrap_err();
        let names: Vec<_> = diags.iter().filter_map(|d| d.unknown_symbol(false)).collect();
        assert_eq!(names, vec!["step"]);
    }

    #[test]
    fn test_missing_attribute() {
        let expr = parse_expression("var.port").unwrap();
        let diags = expr.evaluate(&ctx()).unwrap_err();
        let msg = diags.to_string();
        assert!(msg.contains("Unsupported attribute"), "got: {msg}");
        assert!(msg.contains("port"), "got: {msg}");
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let expr = parse_expression("(1 + 2) * 3 >= 9 && 7 % 4 == 3").unwrap();
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_dynamic_index() {
        let ctx = ctx().with_variable("i", 1_i64);
        let expr = parse_expression("items[i]").unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::from("b"));
    }

    #[test]
    fn test_index_out_of_range() {
        let expr = parse_expression("items[5]").unwrap();
        let msg = expr.evaluate(&ctx()).unwrap_err().to_string();
        assert!(msg.contains("Invalid index"), "got: {msg}");
    }

    #[test]
    fn test_conditional_selects_branch() {
        let expr = parse_expression(r#"1 < 2 ? "yes" : "no""#).unwrap();
        assert_eq!(expr.evaluate(&ctx()).unwrap(), Value::from("yes"));
    }

    #[test]
    fn test_unknown_function_is_error() {
        let expr = parse_expression("jsonencode(var.host)").unwrap();
        let msg = expr.evaluate(&ctx()).unwrap_err().to_string();
        assert!(msg.contains("Call to unknown function"), "got: {msg}");
    }

    #[test]
    fn test_tuple_reports_every_element() {
        let expr = Expression::Tuple(vec![
            parse_expression("var.port").unwrap(),
            parse_expression("items[9]").unwrap(),
        ]);
        let diags = expr.evaluate(&ctx()).unwrap_err();
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn test_step_output_and_result_bindings() {
        let output = Output::new("finished").with_data("status_code", 200_i64);
        let ctx = EvalContext::new()
            .with_step_output("http", "fetch", &output)
            .with_result(&output);
        let expr = parse_expression("step.http.fetch.status_code == result.status_code").unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_float_round_trips() {
        let ctx = ctx().with_variable("ratio", 0.25);
        let expr = parse_expression("ratio * 2").unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Number(0.5));
    }
}
