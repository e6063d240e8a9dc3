//! Diagnostics produced while decoding, resolving, and validating resources.
//!
//! A `Diagnostic` is the unit of user-facing feedback. Problems are collected
//! into a `Diagnostics` batch per resource instead of aborting on the first
//! one, so a single pass over a configuration reports everything it can.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Detail text prefix the expression evaluator uses for unknown root symbols.
const UNKNOWN_VARIABLE_PREFIX: &str = "There is no variable named \"";

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Logical location of an attribute or block.
///
/// The decoder works on already-structured documents, so locations are
/// expressed as a dotted block path (`pipeline.p1.step.http.s1.url`) plus the
/// originating file when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub path: String,
}

impl SourceRange {
    pub fn new(filename: Option<&str>, path: impl Into<String>) -> Self {
        Self {
            filename: filename.map(String::from),
            path: path.into(),
        }
    }

    /// A range for a child element of this one.
    pub fn child(&self, segment: &str) -> Self {
        let path = if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.path, segment)
        };
        Self {
            filename: self.filename.clone(),
            path,
        }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filename {
            Some(file) => write!(f, "{file}:{}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Machine-readable classification of a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// An expression referenced a root symbol missing from the environment.
    UnknownVariable { name: String },
    /// A `step.*` or `credential.*` reference had too few segments.
    MalformedReference { reference: String },
    /// An attribute name the resource does not accept.
    UnsupportedAttribute { name: String },
    /// A structural rule was violated.
    Validation,
    #[default]
    Other,
}

/// A single problem report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SourceRange>,
    #[serde(default)]
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    /// An error-severity diagnostic.
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
            kind: DiagnosticKind::Other,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary, detail)
        }
    }

    /// A validation error (structural rule violated).
    pub fn validation(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::error(summary, detail).with_kind(DiagnosticKind::Validation)
    }

    /// The evaluator's report for an unknown root symbol.
    pub fn unknown_variable(name: &str) -> Self {
        Self::error(
            "Unknown variable",
            format!("{UNKNOWN_VARIABLE_PREFIX}{name}\"."),
        )
        .with_kind(DiagnosticKind::UnknownVariable {
            name: name.to_string(),
        })
    }

    pub fn with_subject(mut self, subject: SourceRange) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attach a subject only when none is set yet.
    pub fn or_subject(mut self, subject: &SourceRange) -> Self {
        if self.subject.is_none() {
            self.subject = Some(subject.clone());
        }
        self
    }

    pub fn with_kind(mut self, kind: DiagnosticKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Root symbol this diagnostic reports as unknown, if any.
    ///
    /// The typed kind wins. When `match_detail_text` is set, a diagnostic with
    /// no typed kind is also recognised by the evaluator's detail wording
    /// (`There is no variable named "X".`), which keeps diagnostics coming
    /// from older evaluators classifiable.
    pub fn unknown_symbol(&self, match_detail_text: bool) -> Option<&str> {
        if let DiagnosticKind::UnknownVariable { name } = &self.kind {
            return Some(name);
        }
        if !match_detail_text || self.kind != DiagnosticKind::Other {
            return None;
        }
        let rest = self.detail.split_once(UNKNOWN_VARIABLE_PREFIX)?.1;
        rest.split_once('"').map(|(name, _)| name)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{level}: {}", self.summary)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        if let Some(subject) = &self.subject {
            write!(f, " ({subject})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics batch
// ---------------------------------------------------------------------------

/// An ordered batch of diagnostics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.0.extend(other);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Set `subject` on every diagnostic that lacks one.
    pub fn with_subject(self, subject: &SourceRange) -> Self {
        Self(self.0.into_iter().map(|d| d.or_subject(subject)).collect())
    }

    /// `Ok(value)` when the batch has no errors, otherwise the batch itself.
    pub fn into_result<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.has_errors() { Err(self) } else { Ok(value) }
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self(diagnostics)
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_symbol_from_typed_kind() {
        let diag = Diagnostic::unknown_variable("step");
        assert_eq!(diag.unknown_symbol(false), Some("step"));
        assert_eq!(diag.detail, "There is no variable named \"step\".");
    }

    #[test]
    fn test_unknown_symbol_from_detail_text() {
        let diag = Diagnostic::error("Unknown variable", "There is no variable named \"each\".");
        assert_eq!(diag.unknown_symbol(true), Some("each"));
        assert_eq!(diag.unknown_symbol(false), None);
    }

    #[test]
    fn test_unknown_symbol_ignores_other_kinds() {
        let diag = Diagnostic::validation("Bad", "There is no variable named \"each\".");
        assert_eq!(diag.unknown_symbol(true), None);
    }

    #[test]
    fn test_subject_only_filled_when_missing() {
        let first = SourceRange::new(None, "a");
        let second = SourceRange::new(None, "b");
        let diags: Diagnostics = vec![
            Diagnostic::error("x", ""),
            Diagnostic::error("y", "").with_subject(first.clone()),
        ]
        .into();
        let diags = diags.with_subject(&second);
        let subjects: Vec<_> = diags.iter().map(|d| d.subject.clone().unwrap()).collect();
        assert_eq!(subjects, vec![second, first]);
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let diags: Diagnostics = Diagnostic::warning("careful", "").into();
        assert!(!diags.has_errors());
        assert!(diags.into_result(()).is_ok());
    }

    #[test]
    fn test_source_range_child_and_display() {
        let range = SourceRange::new(Some("main.yaml"), "pipeline.p1");
        let child = range.child("step");
        assert_eq!(child.path, "pipeline.p1.step");
        assert_eq!(child.to_string(), "main.yaml:pipeline.p1.step");
    }
}
