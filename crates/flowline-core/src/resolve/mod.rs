//! Staged attribute resolution.
//!
//! At definition time only part of the expression environment exists: step
//! outputs, loop bindings, params and credentials appear at run time. Each
//! attribute is therefore either evaluated now (`Outcome::Resolved`), kept
//! for later (`Outcome::Deferred`), or rejected (`Outcome::Failed`).
//!
//! Deferral is decided from the diagnostics of a failed evaluation. When the
//! failure names `step` or `credential`, the expression's traversals also
//! tell which step or credential the attribute waits for; those become
//! dependency edges. Resolvers never mutate their owner: they return a
//! `Resolution` and the owner merges it.

mod attribute;
mod body;
mod classify;

use flowline_types::config::ResolverConfig;
use flowline_types::diagnostic::Diagnostics;
use flowline_types::pipeline::{DependencyEdge, EdgeKind};
use flowline_types::value::Value;

use crate::expression::EvalContext;

pub use attribute::{resolve_attribute, resolve_expression};
pub use body::{BodyValues, evaluate_body, resolve_body};
pub use classify::{BatchClassification, Classification, classify, classify_all};

// ---------------------------------------------------------------------------
// DependencySet
// ---------------------------------------------------------------------------

/// Ordered, deduplicated `depends_on` and `credential_depends_on` edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    depends_on: Vec<String>,
    credential_depends_on: Vec<String>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge. Returns `false` when it was already present.
    pub fn add(&mut self, edge: DependencyEdge) -> bool {
        let list = match edge.kind {
            EdgeKind::Step => &mut self.depends_on,
            EdgeKind::Credential => &mut self.credential_depends_on,
        };
        if list.contains(&edge.target) {
            return false;
        }
        list.push(edge.target);
        true
    }

    pub fn merge(&mut self, other: DependencySet) {
        for target in other.depends_on {
            self.add(DependencyEdge {
                kind: EdgeKind::Step,
                target,
            });
        }
        for target in other.credential_depends_on {
            self.add(DependencyEdge {
                kind: EdgeKind::Credential,
                target,
            });
        }
    }

    /// Step targets, `"<kind>.<name>"`, in first-seen order.
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Credential targets, `"<kind>.<name>"` or `"<kind>.<dynamic>"`.
    pub fn credential_depends_on(&self) -> &[String] {
        &self.credential_depends_on
    }

    pub fn is_empty(&self) -> bool {
        self.depends_on.is_empty() && self.credential_depends_on.is_empty()
    }

    /// Drop a step target (a step never waits for itself).
    pub fn remove_step(&mut self, target: &str) {
        self.depends_on.retain(|t| t != target);
    }
}

impl FromIterator<DependencyEdge> for DependencySet {
    fn from_iter<I: IntoIterator<Item = DependencyEdge>>(iter: I) -> Self {
        let mut set = Self::new();
        for edge in iter {
            set.add(edge);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Resolution results
// ---------------------------------------------------------------------------

/// What happened to one attribute or block.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T = Value> {
    Resolved(T),
    /// Not evaluable yet; keep the expression and retry at run time.
    Deferred,
    Failed(Diagnostics),
}

/// An outcome plus the dependencies discovered on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T = Value> {
    pub outcome: Outcome<T>,
    pub dependencies: DependencySet,
}

impl<T> Resolution<T> {
    pub fn resolved(value: T) -> Self {
        Self {
            outcome: Outcome::Resolved(value),
            dependencies: DependencySet::new(),
        }
    }

    pub fn deferred(dependencies: DependencySet) -> Self {
        Self {
            outcome: Outcome::Deferred,
            dependencies,
        }
    }

    pub fn failed(diagnostics: Diagnostics) -> Self {
        Self {
            outcome: Outcome::Failed(diagnostics),
            dependencies: DependencySet::new(),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.outcome, Outcome::Deferred)
    }

    /// Move the dependencies into `into` and return the bare outcome.
    pub fn merge_into(self, into: &mut DependencySet) -> Outcome<T> {
        into.merge(self.dependencies);
        self.outcome
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Where an expression is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockContext {
    /// A plain resource attribute.
    Attribute,
    Loop,
    Retry,
    Throw,
    Error,
    /// Trigger attributes; `self` is the trigger's run-time payload.
    Trigger,
}

impl BlockContext {
    pub fn is_block(&self) -> bool {
        !matches!(self, BlockContext::Attribute | BlockContext::Trigger)
    }

    /// `result` is bound while these blocks are evaluated.
    pub fn allows_result(&self) -> bool {
        matches!(self, BlockContext::Loop | BlockContext::Retry | BlockContext::Throw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockContext::Attribute => "attribute",
            BlockContext::Loop => "loop",
            BlockContext::Retry => "retry",
            BlockContext::Throw => "throw",
            BlockContext::Error => "error",
            BlockContext::Trigger => "trigger",
        }
    }
}

/// Everything a resolver reads.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub env: &'a EvalContext,
    pub config: &'a ResolverConfig,
    pub block: BlockContext,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(env: &'a EvalContext, config: &'a ResolverConfig) -> Self {
        Self {
            env,
            config,
            block: BlockContext::Attribute,
        }
    }

    pub fn in_block(self, block: BlockContext) -> Self {
        Self { block, ..self }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_set_dedupes_in_order() {
        let mut set = DependencySet::new();
        assert!(set.add(DependencyEdge::step("http", "b")));
        assert!(set.add(DependencyEdge::step("http", "a")));
        assert!(!set.add(DependencyEdge::step("http", "b")));
        assert!(set.add(DependencyEdge::dynamic_credential("aws")));
        assert_eq!(set.depends_on(), ["http.b", "http.a"]);
        assert_eq!(set.credential_depends_on(), ["aws.<dynamic>"]);
    }

    #[test]
    fn test_merge_keeps_first_seen_order() {
        let mut a: DependencySet = [DependencyEdge::step("sleep", "x")].into_iter().collect();
        let b: DependencySet = [DependencyEdge::step("http", "y"), DependencyEdge::step("sleep", "x")]
            .into_iter()
            .collect();
        a.merge(b);
        assert_eq!(a.depends_on(), ["sleep.x", "http.y"]);
    }

    #[test]
    fn test_block_context_result_allowance() {
        assert!(BlockContext::Loop.allows_result());
        assert!(BlockContext::Throw.allows_result());
        assert!(!BlockContext::Error.allows_result());
        assert!(!BlockContext::Attribute.allows_result());
        assert!(BlockContext::Error.is_block());
    }
}
