//! The step model: one payload per step kind plus the attributes and
//! blocks every step shares.
//!
//! A step is decoded from a `step "<kind>" "<name>"` block in one pass.
//! Each attribute goes through the attribute resolver: resolved values land
//! in the typed payload, deferred expressions are kept by name, and the
//! dependencies discovered along the way accumulate on the step. At run time
//! the engine calls [`PipelineStep::get_inputs`] with a fuller environment.

mod container;
pub(crate) mod convert;
mod email;
mod error_config;
mod function;
mod http;
mod input;
mod loop_config;
mod message;
mod pipeline_call;
mod query;
mod retry;
mod sleep;
mod throw;
mod transform;

use std::collections::{BTreeMap, BTreeSet};

use flowline_types::config::RetryDefaults;
use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::error::InputError;
use flowline_types::pipeline::{DependencyEdge, StepKind, UnknownKeyword};
use flowline_types::value::Value;
use serde::{Deserialize, Serialize};

use crate::block::{Attribute, Block, unsupported_attribute, unsupported_block};
use crate::expression::{EvalContext, Expression};
use crate::output::PipelineOutput;
use crate::resolve::{DependencySet, Outcome, ResolutionContext, resolve_attribute, resolve_expression};

pub use container::ContainerStep;
pub use convert::{Converted, TypeMismatch};
pub use email::EmailStep;
pub use error_config::ErrorConfig;
pub use function::FunctionStep;
pub use http::{BasicAuth, HttpStep};
pub use input::{InputOption, InputStep};
pub use loop_config::{LoopConfig, LoopEvaluation};
pub use message::MessageStep;
pub use pipeline_call::PipelineCallStep;
pub use query::QueryStep;
pub use retry::RetryConfig;
pub use sleep::{SleepStep, parse_duration};
pub use throw::ThrowConfig;
pub use transform::TransformStep;

/// Attributes every step accepts.
pub const BASE_ATTRIBUTES: &[&str] = &["title", "description", "depends_on", "for_each", "if", "timeout"];

// ---------------------------------------------------------------------------
// StepPayload
// ---------------------------------------------------------------------------

/// The kind-specific part of a step.
///
/// Attributes of nested kind blocks are addressed as `<block>.<attr>`, or
/// `<block>.<label>.<attr>` for labeled blocks (`option "yes" { label = .. }`
/// sets `option.yes.label`).
pub trait StepPayload {
    const ATTRIBUTES: &'static [&'static str];
    const BLOCKS: &'static [&'static str] = &[];

    fn accepts(&self, name: &str) -> bool {
        Self::ATTRIBUTES.contains(&name)
    }

    /// Called once per nested kind block, before its attributes are set.
    fn open_block(&mut self, _block_type: &str, _labels: &[String]) {}

    /// Store a resolved value. Names the kind does not know are ignored.
    fn set_value(&mut self, name: &str, value: Value) -> Converted<()>;

    /// The input map handed to the execution engine.
    fn inputs(&self) -> BTreeMap<String, Value>;

    /// First required attribute that is still unset.
    fn missing_required(&self) -> Option<&'static str> {
        None
    }

    fn validate(&self, _range: &SourceRange) -> Diagnostics {
        Diagnostics::new()
    }
}

fn blocks_of<P: StepPayload>(_payload: &P) -> &'static [&'static str] {
    P::BLOCKS
}

// ---------------------------------------------------------------------------
// StepSpec
// ---------------------------------------------------------------------------

/// Kind-specific payload of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpec {
    Http(HttpStep),
    Sleep(SleepStep),
    Email(EmailStep),
    Transform(TransformStep),
    Query(QueryStep),
    Pipeline(PipelineCallStep),
    Function(FunctionStep),
    Container(ContainerStep),
    Input(InputStep),
    Message(MessageStep),
}

macro_rules! with_payload {
    ($spec:expr, $payload:ident => $body:expr) => {
        match $spec {
            StepSpec::Http($payload) => $body,
            StepSpec::Sleep($payload) => $body,
            StepSpec::Email($payload) => $body,
            StepSpec::Transform($payload) => $body,
            StepSpec::Query($payload) => $body,
            StepSpec::Pipeline($payload) => $body,
            StepSpec::Function($payload) => $body,
            StepSpec::Container($payload) => $body,
            StepSpec::Input($payload) => $body,
            StepSpec::Message($payload) => $body,
        }
    };
}

impl StepSpec {
    /// An empty payload of `kind`.
    pub fn new(kind: StepKind) -> Self {
        match kind {
            StepKind::Http => StepSpec::Http(HttpStep::default()),
            StepKind::Sleep => StepSpec::Sleep(SleepStep::default()),
            StepKind::Email => StepSpec::Email(EmailStep::default()),
            StepKind::Transform => StepSpec::Transform(TransformStep::default()),
            StepKind::Query => StepSpec::Query(QueryStep::default()),
            StepKind::Pipeline => StepSpec::Pipeline(PipelineCallStep::default()),
            StepKind::Function => StepSpec::Function(FunctionStep::default()),
            StepKind::Container => StepSpec::Container(ContainerStep::default()),
            StepKind::Input => StepSpec::Input(InputStep::default()),
            StepKind::Message => StepSpec::Message(MessageStep::default()),
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            StepSpec::Http(_) => StepKind::Http,
            StepSpec::Sleep(_) => StepKind::Sleep,
            StepSpec::Email(_) => StepKind::Email,
            StepSpec::Transform(_) => StepKind::Transform,
            StepSpec::Query(_) => StepKind::Query,
            StepSpec::Pipeline(_) => StepKind::Pipeline,
            StepSpec::Function(_) => StepKind::Function,
            StepSpec::Container(_) => StepKind::Container,
            StepSpec::Input(_) => StepKind::Input,
            StepSpec::Message(_) => StepKind::Message,
        }
    }

    pub fn accepts(&self, name: &str) -> bool {
        with_payload!(self, p => p.accepts(name))
    }

    pub fn accepts_block(&self, block_type: &str) -> bool {
        with_payload!(self, p => blocks_of(p).contains(&block_type))
    }

    pub fn open_block(&mut self, block_type: &str, labels: &[String]) {
        with_payload!(self, p => p.open_block(block_type, labels))
    }

    pub fn set_value(&mut self, name: &str, value: Value) -> Converted<()> {
        with_payload!(self, p => p.set_value(name, value))
    }

    pub fn inputs(&self) -> BTreeMap<String, Value> {
        with_payload!(self, p => p.inputs())
    }

    pub fn missing_required(&self) -> Option<&'static str> {
        with_payload!(self, p => p.missing_required())
    }

    pub fn validate(&self, range: &SourceRange) -> Diagnostics {
        with_payload!(self, p => p.validate(range))
    }
}

// ---------------------------------------------------------------------------
// StepBase
// ---------------------------------------------------------------------------

/// State shared by every step kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StepBase {
    pub name: String,
    pub kind: StepKind,
    pub pipeline_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Milliseconds or a duration string; also the container run timeout.
    pub timeout: Option<Value>,
    pub if_condition: Option<bool>,
    pub for_each: Option<Expression>,
    pub dependencies: DependencySet,
    /// Attributes that must be evaluated at run time, by attribute name.
    pub unresolved_attributes: BTreeMap<String, Expression>,
    /// `retry` and `error` blocks kept raw for run-time decoding.
    pub unresolved_bodies: BTreeMap<String, Block>,
    pub error_config: Option<ErrorConfig>,
    pub retry_config: Option<RetryConfig>,
    pub throw_configs: Vec<ThrowConfig>,
    pub loop_config: Option<LoopConfig>,
    pub outputs: BTreeMap<String, PipelineOutput>,
    pub range: SourceRange,
}

// ---------------------------------------------------------------------------
// PipelineStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStep {
    pub base: StepBase,
    pub spec: StepSpec,
}

impl PipelineStep {
    pub fn new(kind: StepKind, name: &str, pipeline_name: &str) -> Self {
        Self {
            base: StepBase {
                name: name.to_string(),
                kind,
                pipeline_name: pipeline_name.to_string(),
                title: None,
                description: None,
                timeout: None,
                if_condition: None,
                for_each: None,
                dependencies: DependencySet::new(),
                unresolved_attributes: BTreeMap::new(),
                unresolved_bodies: BTreeMap::new(),
                error_config: None,
                retry_config: None,
                throw_configs: Vec::new(),
                loop_config: None,
                outputs: BTreeMap::new(),
                range: SourceRange::new(None, format!("step.{kind}.{name}")),
            },
            spec: StepSpec::new(kind),
        }
    }

    /// Decode a `step "<kind>" "<name>"` block.
    pub fn from_block(block: &Block, pipeline_name: &str, ctx: &ResolutionContext<'_>) -> Result<Self, Diagnostics> {
        let [kind, name] = block.labels.as_slice() else {
            return Err(Diagnostic::error(
                "Invalid step block",
                "A step block needs two labels: the step type and the step name.",
            )
            .with_subject(block.range.clone())
            .into());
        };
        let kind: StepKind = kind.parse().map_err(|e: UnknownKeyword| {
            Diagnostics::from(Diagnostic::error("Invalid step type", e.to_string()).with_subject(block.range.clone()))
        })?;

        let mut step = Self::new(kind, name, pipeline_name);
        step.base.range = block.range.clone();

        let mut diags = step.set_attributes(block, ctx);
        diags.extend(step.set_block_config(block, ctx));
        diags.extend(step.validate());

        let own = step.full_name();
        step.base.dependencies.remove_step(&own);

        if diags.has_errors() {
            tracing::warn!(step = %own, pipeline = pipeline_name, errors = diags.len(), "step rejected");
            return Err(diags);
        }
        tracing::debug!(
            step = %own,
            pipeline = pipeline_name,
            resolved = step.is_resolved(),
            depends_on = ?step.depends_on(),
            credential_depends_on = ?step.credential_depends_on(),
            "decoded step"
        );
        Ok(step)
    }

    /// `"<kind>.<name>"`, the target used by dependency edges.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.base.kind, self.base.name)
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn kind(&self) -> StepKind {
        self.base.kind
    }

    pub fn depends_on(&self) -> &[String] {
        self.base.dependencies.depends_on()
    }

    pub fn credential_depends_on(&self) -> &[String] {
        self.base.dependencies.credential_depends_on()
    }

    /// True when the unresolved-expression store is empty. Raw `retry` and
    /// `error` bodies are not counted.
    pub fn attributes_resolved(&self) -> bool {
        self.base.unresolved_attributes.is_empty()
    }

    /// True when nothing, attribute or body, waits for run time.
    pub fn is_resolved(&self) -> bool {
        self.attributes_resolved() && self.base.unresolved_bodies.is_empty()
    }

    // --- Attributes ---

    /// Resolve the attributes of the step block itself.
    pub fn set_attributes(&mut self, block: &Block, ctx: &ResolutionContext<'_>) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for attribute in &block.attributes {
            let name = attribute.name.as_str();
            if BASE_ATTRIBUTES.contains(&name) {
                self.set_base_attribute(attribute, ctx, &mut diags);
            } else if self.spec.accepts(name) {
                self.resolve_into_spec(name, &attribute.expr, &attribute.range, ctx, &mut diags);
            } else {
                diags.push(unsupported_attribute(attribute, &format!("{} step", self.base.kind)));
            }
        }
        diags
    }

    fn set_base_attribute(&mut self, attribute: &Attribute, ctx: &ResolutionContext<'_>, diags: &mut Diagnostics) {
        let name = attribute.name.as_str();
        if name == "for_each" {
            self.base.for_each = Some(attribute.expr.clone());
        }

        let value = match resolve_attribute(attribute, ctx).merge_into(&mut self.base.dependencies) {
            Outcome::Resolved(value) => value,
            Outcome::Deferred => {
                if !matches!(name, "depends_on" | "for_each") {
                    self.base
                        .unresolved_attributes
                        .insert(name.to_string(), attribute.expr.clone());
                }
                return;
            }
            Outcome::Failed(failed) => {
                diags.extend(failed);
                return;
            }
        };

        let set = match name {
            "title" => convert::string(name, value).map(|s| self.base.title = Some(s)),
            "description" => convert::string(name, value).map(|s| self.base.description = Some(s)),
            "if" => convert::boolean(name, value).map(|b| self.base.if_condition = Some(b)),
            "timeout" => {
                if let Err(detail) = parse_duration(&value) {
                    diags.push(Diagnostic::validation("Invalid timeout", detail).with_subject(attribute.range.clone()));
                }
                self.base.timeout = Some(value);
                Ok(())
            }
            "for_each" => {
                if !matches!(value, Value::List(_) | Value::Map(_)) {
                    diags.push(
                        Diagnostic::error(
                            "Invalid for_each argument",
                            format!("for_each must be a list or a map, got {}.", value.type_name()),
                        )
                        .with_subject(attribute.range.clone()),
                    );
                }
                Ok(())
            }
            _ => {
                self.add_explicit_dependencies(&value, &attribute.range, diags);
                Ok(())
            }
        };
        if let Err(mismatch) = set {
            diags.push(mismatch.into_diagnostic(&attribute.range));
        }
    }

    /// Static `depends_on` entries: `"step.<kind>.<name>"` or `"<kind>.<name>"`.
    fn add_explicit_dependencies(&mut self, value: &Value, range: &SourceRange, diags: &mut Diagnostics) {
        let entries = match value {
            Value::List(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };
        for entry in entries {
            let parsed = entry.as_str().and_then(|text| {
                let text = text.strip_prefix("step.").unwrap_or(text);
                let (kind, name) = text.split_once('.')?;
                kind.parse::<StepKind>().ok()?;
                (!name.is_empty() && !name.contains('.')).then(|| DependencyEdge::step(kind, name))
            });
            match parsed {
                Some(edge) => {
                    self.base.dependencies.add(edge);
                }
                None => diags.push(
                    Diagnostic::error(
                        "Invalid depends_on",
                        format!("\"{entry}\" is not a step reference of the form step.<type>.<name>."),
                    )
                    .with_subject(range.clone()),
                ),
            }
        }
    }

    fn resolve_into_spec(
        &mut self,
        name: &str,
        expr: &Expression,
        range: &SourceRange,
        ctx: &ResolutionContext<'_>,
        diags: &mut Diagnostics,
    ) {
        match resolve_expression(expr, range, ctx).merge_into(&mut self.base.dependencies) {
            Outcome::Resolved(value) => {
                if let Err(mismatch) = self.spec.set_value(name, value) {
                    diags.push(mismatch.into_diagnostic(range));
                }
            }
            Outcome::Deferred => {
                self.base.unresolved_attributes.insert(name.to_string(), expr.clone());
            }
            Outcome::Failed(failed) => diags.extend(failed),
        }
    }

    // --- Blocks ---

    /// Decode the nested blocks of the step block.
    pub fn set_block_config(&mut self, block: &Block, ctx: &ResolutionContext<'_>) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut seen = BTreeSet::new();
        for nested in &block.blocks {
            let block_type = nested.block_type.as_str();
            if matches!(block_type, "loop" | "retry" | "error") && !seen.insert(block_type) {
                diags.push(
                    Diagnostic::error(
                        "Duplicate block",
                        format!("Only one {block_type} block is allowed in a step."),
                    )
                    .with_subject(nested.range.clone()),
                );
                continue;
            }
            match block_type {
                "loop" => match LoopConfig::decode(nested, &self.spec, ctx) {
                    Ok((config, deps)) => {
                        self.base.dependencies.merge(deps);
                        self.base.loop_config = Some(config);
                    }
                    Err(failed) => diags.extend(failed),
                },
                "retry" => match RetryConfig::decode(nested, ctx).merge_into(&mut self.base.dependencies) {
                    Outcome::Resolved(config) => self.base.retry_config = Some(config),
                    Outcome::Deferred => {
                        self.base.unresolved_bodies.insert("retry".to_string(), nested.clone());
                    }
                    Outcome::Failed(failed) => diags.extend(failed),
                },
                "error" => match ErrorConfig::decode(nested, ctx).merge_into(&mut self.base.dependencies) {
                    Outcome::Resolved(config) => self.base.error_config = Some(config),
                    Outcome::Deferred => {
                        self.base.unresolved_bodies.insert("error".to_string(), nested.clone());
                    }
                    Outcome::Failed(failed) => diags.extend(failed),
                },
                "throw" => match ThrowConfig::decode(nested, ctx) {
                    Ok((config, deps)) => {
                        self.base.dependencies.merge(deps);
                        self.base.throw_configs.push(config);
                    }
                    Err(failed) => diags.extend(failed),
                },
                "output" => match PipelineOutput::decode(nested, ctx) {
                    Ok(output) if self.base.outputs.contains_key(&output.name) => diags.push(
                        Diagnostic::error(
                            "Duplicate output",
                            format!("An output named \"{}\" was already declared in this step.", output.name),
                        )
                        .with_subject(nested.range.clone()),
                    ),
                    Ok(output) => {
                        self.base.dependencies.merge(output.dependencies.clone());
                        self.base.outputs.insert(output.name.clone(), output);
                    }
                    Err(failed) => diags.extend(failed),
                },
                other if self.spec.accepts_block(other) => self.set_kind_block(nested, ctx, &mut diags),
                _ => diags.push(unsupported_block(nested, "step")),
            }
        }
        diags
    }

    /// A nested block owned by the step kind, such as `basic_auth`.
    fn set_kind_block(&mut self, block: &Block, ctx: &ResolutionContext<'_>, diags: &mut Diagnostics) {
        self.spec.open_block(&block.block_type, &block.labels);
        let prefix = std::iter::once(block.block_type.as_str())
            .chain(block.labels.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".");
        for attribute in &block.attributes {
            let name = format!("{prefix}.{}", attribute.name);
            if self.spec.accepts(&name) {
                self.resolve_into_spec(&name, &attribute.expr, &attribute.range, ctx, diags);
            } else {
                diags.push(unsupported_attribute(attribute, &block.block_type));
            }
        }
        for nested in &block.blocks {
            diags.push(unsupported_block(nested, &block.block_type));
        }
    }

    /// Kind rules over the values resolved so far.
    pub fn validate(&self) -> Diagnostics {
        let mut diags = self.spec.validate(&self.base.range);
        if let Some(retry) = &self.base.retry_config {
            diags.extend(retry.validate(&self.base.range.child("retry")));
        }
        diags
    }

    // --- Run time ---

    /// Evaluate every deferred attribute against `env` and return the
    /// complete input map of the step.
    pub fn get_inputs(&self, env: &EvalContext) -> Result<BTreeMap<String, Value>, InputError> {
        let step = self.full_name();
        let mut spec = self.spec.clone();
        let mut timeout = self.base.timeout.clone();
        let mut diags = Diagnostics::new();

        for (name, expr) in &self.base.unresolved_attributes {
            let value = match expr.evaluate(env) {
                Ok(value) => value,
                Err(failed) => {
                    diags.extend(failed.with_subject(&self.base.range.child(name)));
                    continue;
                }
            };
            match name.as_str() {
                "timeout" => timeout = Some(value),
                "title" | "description" | "if" => {}
                _ => spec
                    .set_value(name, value)
                    .map_err(|mismatch| mismatch.into_input_error(&step))?,
            }
        }
        if !diags.is_empty() {
            return Err(InputError::Evaluation(diags));
        }

        if let Some(attribute) = spec.missing_required() {
            return Err(InputError::MissingRequired {
                step,
                attribute: attribute.to_string(),
            });
        }
        let invalid = spec.validate(&self.base.range);
        if invalid.has_errors() {
            return Err(InputError::Invalid {
                step,
                message: invalid.to_string(),
            });
        }

        let mut inputs = spec.inputs();
        if let Some(timeout) = timeout {
            inputs.insert("timeout".to_string(), timeout);
        }
        Ok(inputs)
    }

    /// The step's `if` predicate; a step without one always runs.
    pub fn evaluate_if(&self, env: &EvalContext) -> Result<bool, Diagnostics> {
        let Some(expr) = self.base.unresolved_attributes.get("if") else {
            return Ok(self.base.if_condition.unwrap_or(true));
        };
        let range = self.base.range.child("if");
        let value = expr.evaluate(env).map_err(|d| d.with_subject(&range))?;
        convert::boolean("if", value).map_err(|mismatch| mismatch.into_diagnostic(&range).into())
    }

    /// The collection a `for_each` step iterates over.
    pub fn evaluate_for_each(&self, env: &EvalContext) -> Result<Option<Value>, Diagnostics> {
        let Some(expr) = &self.base.for_each else {
            return Ok(None);
        };
        let range = self.base.range.child("for_each");
        match expr.evaluate(env).map_err(|d| d.with_subject(&range))? {
            value @ (Value::List(_) | Value::Map(_)) => Ok(Some(value)),
            other => Err(Diagnostic::error(
                "Invalid for_each argument",
                format!("for_each must be a list or a map, got {}.", other.type_name()),
            )
            .with_subject(range)
            .into()),
        }
    }

    /// The retry configuration, decoding a retained block against `env`.
    pub fn resolve_retry_config(
        &self,
        env: &EvalContext,
        defaults: &RetryDefaults,
    ) -> Result<Option<RetryConfig>, Diagnostics> {
        if let Some(config) = &self.base.retry_config {
            return Ok(Some(config.clone()));
        }
        match self.base.unresolved_bodies.get("retry") {
            Some(block) => RetryConfig::resolve(block, env, defaults).map(Some),
            None => Ok(None),
        }
    }

    /// The error configuration, decoding a retained block against `env`.
    pub fn resolve_error_config(&self, env: &EvalContext) -> Result<Option<ErrorConfig>, Diagnostics> {
        if let Some(config) = &self.base.error_config {
            return Ok(Some(config.clone()));
        }
        match self.base.unresolved_bodies.get("error") {
            Some(block) => ErrorConfig::resolve(block, env).map(Some),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
