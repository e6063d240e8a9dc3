//! The block/attribute tree produced by the decoder.

use flowline_types::diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, SourceRange};

use crate::expression::Expression;

/// A named expression inside a block.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub expr: Expression,
    pub range: SourceRange,
}

impl Attribute {
    pub fn new(name: impl Into<String>, expr: Expression) -> Self {
        let name = name.into();
        Self {
            range: SourceRange::new(None, name.clone()),
            name,
            expr,
        }
    }
}

/// Source ranges do not take part in equality.
impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.expr == other.expr
    }
}

/// A typed, optionally labeled block such as `step "http" "s1" { ... }`.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub block_type: String,
    pub labels: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
    pub range: SourceRange,
    /// Problems found while decoding this block's own attributes.
    pub diagnostics: Diagnostics,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.block_type == other.block_type
            && self.labels == other.labels
            && self.attributes == other.attributes
            && self.blocks == other.blocks
    }
}

impl Block {
    pub fn new(block_type: impl Into<String>, labels: Vec<String>) -> Self {
        let block_type = block_type.into();
        let mut path = block_type.clone();
        for label in &labels {
            path.push('.');
            path.push_str(label);
        }
        Self {
            range: SourceRange::new(None, path),
            block_type,
            labels,
            ..Self::default()
        }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }

    /// Builder used when assembling blocks by hand.
    pub fn with_attribute(mut self, name: &str, expr: Expression) -> Self {
        let range = self.range.child(name);
        self.attributes.push(Attribute {
            name: name.to_string(),
            expr,
            range,
        });
        self
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn blocks_of_type<'a>(&'a self, block_type: &'a str) -> impl Iterator<Item = &'a Block> {
        self.blocks.iter().filter(move |b| b.block_type == block_type)
    }

    /// One "Unsupported attribute" diagnostic per attribute not in `allowed`.
    pub fn unsupported_attributes(&self, allowed: &[&str]) -> Diagnostics {
        self.attributes
            .iter()
            .filter(|a| !allowed.contains(&a.name.as_str()))
            .map(|a| unsupported_attribute(a, &self.block_type))
            .collect()
    }

    /// Decode diagnostics of this block and every nested block.
    pub fn all_diagnostics(&self) -> Diagnostics {
        let mut diags = self.diagnostics.clone();
        for block in &self.blocks {
            diags.extend(block.all_diagnostics());
        }
        diags
    }
}

pub fn unsupported_attribute(attribute: &Attribute, block_type: &str) -> Diagnostic {
    Diagnostic::error(
        "Unsupported attribute",
        format!(
            "An argument named \"{}\" is not expected in a {block_type} block.",
            attribute.name
        ),
    )
    .with_subject(attribute.range.clone())
    .with_kind(DiagnosticKind::UnsupportedAttribute {
        name: attribute.name.clone(),
    })
}

pub fn unsupported_block(block: &Block, parent_type: &str) -> Diagnostic {
    Diagnostic::error(
        "Unsupported block type",
        format!(
            "Blocks of type \"{}\" are not expected in a {parent_type} block.",
            block.block_type
        ),
    )
    .with_subject(block.range.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_ranges() {
        let a = Block::new("retry", vec![]).with_attribute("max_attempts", Expression::literal(3_i64));
        let b = Block::new("retry", vec![])
            .with_range(SourceRange::new(Some("other.yaml"), "x"))
            .with_attribute("max_attempts", Expression::literal(3_i64));
        assert_eq!(a, b);
    }

    #[test]
    fn test_attribute_ranges_follow_block() {
        let block = Block::new("step", vec!["http".into(), "s1".into()])
            .with_attribute("url", Expression::literal("https://x"));
        assert_eq!(block.range.path, "step.http.s1");
        assert_eq!(block.attribute("url").unwrap().range.path, "step.http.s1.url");
        assert!(block.attribute("method").is_none());
    }

    #[test]
    fn test_unsupported_attributes_reported_by_name() {
        let block = Block::new("retry", vec![])
            .with_attribute("max_attempts", Expression::literal(3_i64))
            .with_attribute("attempts", Expression::literal(3_i64));
        let diags = block.unsupported_attributes(&["max_attempts"]);
        assert_eq!(diags.len(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(
            diag.kind,
            DiagnosticKind::UnsupportedAttribute {
                name: "attempts".to_string()
            }
        );
        assert_eq!(diag.subject.as_ref().unwrap().path, "retry.attempts");
    }
}
