//! YAML document decoding into `Block` trees.
//!
//! A document is a mapping of top-level block types. Labeled blocks are
//! written as nested mappings, one level per label:
//!
//! ```yaml
//! pipeline:
//!   fetch:                      # pipeline "fetch"
//!     param:
//!       url: { type: string }   # param "url"
//!     step:
//!       http:
//!         get_page:             # step "http" "get_page"
//!           url: "${param.url}"
//!           retry: { max_attempts: 5 }
//!           throw:
//!             - if: "${result.status_code == 500}"
//!               message: server error
//! trigger:
//!   schedule:
//!     nightly:                  # trigger "schedule" "nightly"
//!       schedule: daily
//!       pipeline: "${pipeline.fetch}"
//! ```
//!
//! Which keys open nested blocks depends on the enclosing block type; every
//! other key is an attribute. String values containing `${` are parsed as
//! templates, sequences become tuples and mappings become objects.

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::value::Value;
use serde_yaml_ng::Value as Yaml;
use thiserror::Error;

use crate::block::{Attribute, Block};
use crate::expression::{Expression, parse_template};

/// Failure to read the document as YAML at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("document root must be a mapping of block types")]
    NotAMapping,
}

/// How a nested key is laid out in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// A mapping nested `labels` levels deep.
    Labeled(usize),
    /// A sequence of bodies, or a single body.
    Repeated,
}

/// Nested block types accepted inside `parent` (`""` is the document root).
fn child_shape(parent: &str, key: &str) -> Option<Shape> {
    let shape = match (parent, key) {
        ("", "pipeline") => Shape::Labeled(1),
        ("", "trigger") => Shape::Labeled(2),
        ("pipeline", "param") => Shape::Labeled(1),
        ("pipeline", "step") => Shape::Labeled(2),
        ("pipeline", "output") => Shape::Labeled(1),
        ("step", "output") => Shape::Labeled(1),
        ("step", "option") => Shape::Labeled(1),
        ("step", "loop" | "retry" | "error" | "basic_auth" | "notify") => Shape::Labeled(0),
        ("step", "throw") => Shape::Repeated,
        ("trigger", "capture") => Shape::Labeled(1),
        _ => return None,
    };
    Some(shape)
}

/// A decoded document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub blocks: Vec<Block>,
    /// Problems at the document root (unknown top-level keys).
    pub diagnostics: Diagnostics,
}

/// Decode a whole document into its top-level blocks.
pub fn decode_document(text: &str, filename: Option<&str>) -> Result<Document, DecodeError> {
    let doc: Yaml = serde_yaml_ng::from_str(text)?;
    let root = SourceRange::new(filename, "");
    match doc {
        Yaml::Null => Ok(Document::default()),
        Yaml::Mapping(_) => {
            let body = decode_body("", Vec::new(), &doc, root);
            let mut diagnostics = body.diagnostics;
            for attribute in &body.attributes {
                diagnostics.push(
                    Diagnostic::error(
                        "Unsupported block type",
                        format!("Blocks of type \"{}\" are not expected here.", attribute.name),
                    )
                    .with_subject(attribute.range.clone()),
                );
            }
            Ok(Document {
                blocks: body.blocks,
                diagnostics,
            })
        }
        _ => Err(DecodeError::NotAMapping),
    }
}

fn decode_body(block_type: &str, labels: Vec<String>, yaml: &Yaml, range: SourceRange) -> Block {
    let mut block = Block::new(block_type, labels).with_range(range);
    if yaml.is_null() {
        return block;
    }
    let Yaml::Mapping(mapping) = yaml else {
        block.diagnostics.push(
            Diagnostic::error(
                "Invalid block body",
                format!("The body of a {block_type} block must be a mapping."),
            )
            .with_subject(block.range.clone()),
        );
        return block;
    };

    for (key, value) in mapping {
        let Some(key) = scalar_key(key) else {
            block.diagnostics.push(
                Diagnostic::error("Invalid key", "Block keys must be strings.")
                    .with_subject(block.range.clone()),
            );
            continue;
        };
        let range = block.range.child(&key);
        match (child_shape(block_type, &key), value) {
            (Some(Shape::Labeled(depth)), Yaml::Mapping(_)) => {
                decode_labeled(&key, depth, Vec::new(), value, range, &mut block);
            }
            (Some(Shape::Repeated), Yaml::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let child = decode_body(&key, Vec::new(), item, range.child(&i.to_string()));
                    block.blocks.push(child);
                }
            }
            (Some(Shape::Repeated), Yaml::Mapping(_)) => {
                let child = decode_body(&key, Vec::new(), value, range.child("0"));
                block.blocks.push(child);
            }
            _ => match to_expression(value, &range) {
                Ok(expr) => block.attributes.push(Attribute {
                    name: key,
                    expr,
                    range,
                }),
                Err(diag) => block.diagnostics.push(diag),
            },
        }
    }
    block
}

fn decode_labeled(
    block_type: &str,
    depth: usize,
    labels: Vec<String>,
    yaml: &Yaml,
    range: SourceRange,
    parent: &mut Block,
) {
    if depth == 0 {
        parent.blocks.push(decode_body(block_type, labels, yaml, range));
        return;
    }
    let Yaml::Mapping(mapping) = yaml else {
        parent.diagnostics.push(
            Diagnostic::error(
                "Missing block label",
                format!("A {block_type} block needs {depth} more label(s)."),
            )
            .with_subject(range),
        );
        return;
    };
    for (key, value) in mapping {
        let Some(label) = scalar_key(key) else {
            parent.diagnostics.push(
                Diagnostic::error("Invalid block label", "Block labels must be strings.")
                    .with_subject(range.clone()),
            );
            continue;
        };
        let mut labels = labels.clone();
        labels.push(label.clone());
        decode_labeled(block_type, depth - 1, labels, value, range.child(&label), parent);
    }
}

fn scalar_key(key: &Yaml) -> Option<String> {
    match key {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Convert a YAML value into an expression. Constant subtrees fold into a
/// single literal.
pub fn to_expression(yaml: &Yaml, range: &SourceRange) -> Result<Expression, Diagnostic> {
    let expr = match yaml {
        Yaml::Null => Expression::Literal(Value::Null),
        Yaml::Bool(b) => Expression::Literal(Value::Bool(*b)),
        Yaml::Number(n) => Expression::Literal(n.as_f64().map(Value::Number).unwrap_or(Value::Null)),
        Yaml::String(s) if s.contains("${") => parse_template(s).map_err(|e| {
            Diagnostic::error("Invalid expression", e.to_string()).with_subject(range.clone())
        })?,
        Yaml::String(s) => Expression::Literal(Value::String(s.clone())),
        Yaml::Sequence(items) => {
            let exprs = items
                .iter()
                .enumerate()
                .map(|(i, item)| to_expression(item, &range.child(&i.to_string())))
                .collect::<Result<Vec<_>, _>>()?;
            if exprs.iter().all(Expression::is_literal) {
                Expression::Literal(Value::List(exprs.into_iter().filter_map(into_literal).collect()))
            } else {
                Expression::Tuple(exprs)
            }
        }
        Yaml::Mapping(mapping) => {
            let mut entries = Vec::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = scalar_key(key).ok_or_else(|| {
                    Diagnostic::error("Invalid key", "Object keys must be strings.")
                        .with_subject(range.clone())
                })?;
                let expr = to_expression(value, &range.child(&key))?;
                entries.push((key, expr));
            }
            if entries.iter().all(|(_, e)| e.is_literal()) {
                Expression::Literal(Value::Map(
                    entries
                        .into_iter()
                        .filter_map(|(k, e)| into_literal(e).map(|v| (k, v)))
                        .collect(),
                ))
            } else {
                Expression::Object(entries)
            }
        }
        Yaml::Tagged(tagged) => to_expression(&tagged.value, range)?,
    };
    Ok(expr)
}

fn into_literal(expr: Expression) -> Option<Value> {
    match expr {
        Expression::Literal(value) => Some(value),
        _ => None,
    }
}

/// Decode diagnostics of a set of top-level blocks.
pub fn collect_diagnostics(blocks: &[Block]) -> Diagnostics {
    blocks.iter().flat_map(|b| b.all_diagnostics()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
pipeline:
  fetch:
    title: Fetch a page
    param:
      url:
        type: string
    step:
      http:
        get_page:
          url: "${param.url}"
          request_headers:
            Accept: application/json
          retry:
            max_attempts: 5
          throw:
            - if: "${result.status_code == 500}"
              message: server error
            - if: "${result.status_code == 404}"
    output:
      body:
        value: "${step.http.get_page.response_body}"
trigger:
  schedule:
    nightly:
      schedule: daily
      pipeline: "${pipeline.fetch}"
"#;

    #[test]
    fn test_decode_nested_labels() {
        let blocks = decode_document(DOC, Some("main.yaml")).unwrap().blocks;
        assert_eq!(blocks.len(), 2);

        let pipeline = &blocks[0];
        assert_eq!(pipeline.block_type, "pipeline");
        assert_eq!(pipeline.labels, vec!["fetch"]);
        assert!(pipeline.attribute("title").is_some());

        let step = pipeline.blocks_of_type("step").next().unwrap();
        assert_eq!(step.labels, vec!["http", "get_page"]);
        assert_eq!(step.range.path, "pipeline.fetch.step.http.get_page");
        assert_eq!(step.range.filename.as_deref(), Some("main.yaml"));
        assert_eq!(step.blocks_of_type("throw").count(), 2);
        assert_eq!(step.blocks_of_type("retry").count(), 1);

        let trigger = &blocks[1];
        assert_eq!(trigger.labels, vec!["schedule", "nightly"]);
    }

    #[test]
    fn test_constant_mapping_folds_to_literal() {
        let blocks = decode_document(DOC, None).unwrap().blocks;
        let step = blocks[0].blocks_of_type("step").next().unwrap();
        let headers = step.attribute("request_headers").unwrap();
        let Expression::Literal(value) = &headers.expr else {
            panic!("expected literal");
        };
        assert_eq!(value.get("Accept"), Some(&Value::from("application/json")));
    }

    #[test]
    fn test_template_attribute_parsed() {
        let blocks = decode_document(DOC, None).unwrap().blocks;
        let step = blocks[0].blocks_of_type("step").next().unwrap();
        let url = step.attribute("url").unwrap();
        assert_eq!(url.expr.roots(), vec!["param"]);
    }

    #[test]
    fn test_pipeline_attribute_in_step_is_not_a_block() {
        let doc = r#"
pipeline:
  parent:
    step:
      pipeline:
        call_child:
          pipeline: "${pipeline.child}"
"#;
        let blocks = decode_document(doc, None).unwrap().blocks;
        let step = blocks[0].blocks_of_type("step").next().unwrap();
        assert_eq!(step.labels, vec!["pipeline", "call_child"]);
        assert!(step.attribute("pipeline").is_some());
    }

    #[test]
    fn test_invalid_template_is_diagnostic() {
        let doc = "pipeline:\n  p:\n    description: \"${oops\"\n";
        let blocks = decode_document(doc, None).unwrap().blocks;
        let diags = collect_diagnostics(&blocks);
        assert_eq!(diags.len(), 1);
        let msg = diags.to_string();
        assert!(msg.contains("Invalid expression"), "got: {msg}");
        assert!(msg.contains("pipeline.p.description"), "got: {msg}");
    }

    #[test]
    fn test_non_mapping_root_rejected() {
        assert!(matches!(decode_document("- a\n- b\n", None), Err(DecodeError::NotAMapping)));
        assert!(decode_document("", None).unwrap().blocks.is_empty());
    }

    #[test]
    fn test_unknown_top_level_key_reported() {
        let doc = decode_document("variable: 3
pipeline:
  p: {}
", None).unwrap();
        assert_eq!(doc.blocks.len(), 1);
        let msg = doc.diagnostics.to_string();
        assert!(msg.contains("Unsupported block type"), "got: {msg}");
        assert!(msg.contains("\"variable\""), "got: {msg}");
    }
}
