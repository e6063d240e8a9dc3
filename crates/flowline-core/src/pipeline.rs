//! Pipeline resources: params, steps, outputs and the execution plan.
//!
//! Step dependencies are never declared by hand in the common case; they are
//! inferred while resolving step attributes. `Pipeline::execution_plan` turns
//! those inferred edges into a DAG and groups steps into parallel waves.

use std::collections::{BTreeMap, HashMap};

use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::pipeline::ParamType;
use flowline_types::value::Value;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

use crate::block::{Block, unsupported_block};
use crate::output::PipelineOutput;
use crate::resolve::{Outcome, ResolutionContext, resolve_attribute};
use crate::step::PipelineStep;

pub const ATTRIBUTES: &[&str] = &["title", "description"];
pub const PARAM_ATTRIBUTES: &[&str] = &["type", "default", "optional", "description"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors building an execution plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A step depends on a step the pipeline does not declare.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// The inferred dependencies contain a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParam {
    pub name: String,
    pub param_type: ParamType,
    pub default: Option<Value>,
    pub optional: bool,
    pub description: Option<String>,
    pub range: SourceRange,
}

impl PipelineParam {
    /// Param bodies are static: every attribute must resolve now.
    pub fn decode(block: &Block, ctx: &ResolutionContext<'_>) -> Result<Self, Diagnostics> {
        let Some(name) = block.label(0) else {
            return Err(Diagnostic::error("Missing name for param", "A param block needs a name label.")
                .with_subject(block.range.clone())
                .into());
        };
        let mut param = Self {
            name: name.to_string(),
            param_type: ParamType::Any,
            default: None,
            optional: false,
            description: None,
            range: block.range.clone(),
        };
        let mut diags = block.unsupported_attributes(PARAM_ATTRIBUTES);

        for attribute in &block.attributes {
            let value = match resolve_attribute(attribute, ctx).outcome {
                Outcome::Resolved(value) => value,
                Outcome::Deferred => {
                    diags.push(
                        Diagnostic::error(
                            "Invalid param attribute",
                            format!("The param attribute \"{}\" must be known before the pipeline runs.", attribute.name),
                        )
                        .with_subject(attribute.range.clone()),
                    );
                    continue;
                }
                Outcome::Failed(failed) => {
                    diags.extend(failed);
                    continue;
                }
            };
            let invalid = |expected: &str, value: &Value| {
                Diagnostic::error(
                    "Incorrect attribute value type",
                    format!("The param attribute \"{}\" must be {expected}, got {}.", attribute.name, value.type_name()),
                )
                .with_subject(attribute.range.clone())
            };
            match (attribute.name.as_str(), value) {
                ("type", Value::String(text)) => match text.parse::<ParamType>() {
                    Ok(param_type) => param.param_type = param_type,
                    Err(e) => diags.push(
                        Diagnostic::validation("Invalid param type", e.to_string()).with_subject(attribute.range.clone()),
                    ),
                },
                ("default", value) => param.default = Some(value),
                ("optional", Value::Bool(b)) => param.optional = b,
                ("description", Value::String(text)) => param.description = Some(text),
                ("type" | "description", other) => diags.push(invalid("a string", &other)),
                ("optional", other) => diags.push(invalid("a bool", &other)),
                _ => {}
            }
        }

        if let Some(default) = &param.default {
            if !param.accepts(default) {
                diags.push(
                    Diagnostic::validation(
                        "Invalid param default",
                        format!(
                            "The default of param \"{}\" must be of type {}, got {}.",
                            param.name,
                            param.param_type,
                            default.type_name()
                        ),
                    )
                    .with_subject(param.range.child("default")),
                );
            }
        }
        diags.into_result(param)
    }

    /// Whether `value` matches the declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.param_type {
            ParamType::Any => true,
            ParamType::String => matches!(value, Value::String(_)),
            ParamType::Number => matches!(value, Value::Number(_)),
            ParamType::Bool => matches!(value, Value::Bool(_)),
            ParamType::List => matches!(value, Value::List(_)),
            ParamType::Map => matches!(value, Value::Map(_)),
        }
    }

    /// A param with neither a default nor `optional` must be supplied.
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.optional
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub params: Vec<PipelineParam>,
    pub steps: Vec<PipelineStep>,
    pub outputs: Vec<PipelineOutput>,
    pub range: SourceRange,
}

impl Pipeline {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            description: None,
            params: Vec::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
            range: SourceRange::new(None, format!("pipeline.{name}")),
        }
    }

    /// Decode a `pipeline "<name>"` block with every step, param and output.
    ///
    /// All problems of the pipeline are reported together.
    pub fn from_block(block: &Block, ctx: &ResolutionContext<'_>) -> Result<Self, Diagnostics> {
        let Some(name) = block.label(0) else {
            return Err(Diagnostic::error("Missing name for pipeline", "A pipeline block needs a name label.")
                .with_subject(block.range.clone())
                .into());
        };
        let mut pipeline = Self::new(name);
        pipeline.range = block.range.clone();
        let mut diags = block.unsupported_attributes(ATTRIBUTES);

        for attribute in &block.attributes {
            let target = match attribute.name.as_str() {
                "title" => &mut pipeline.title,
                "description" => &mut pipeline.description,
                _ => continue,
            };
            match resolve_attribute(attribute, ctx).outcome {
                Outcome::Resolved(Value::String(text)) => *target = Some(text),
                Outcome::Resolved(other) => diags.push(
                    Diagnostic::error(
                        "Incorrect attribute value type",
                        format!("The pipeline {} must be a string, got {}.", attribute.name, other.type_name()),
                    )
                    .with_subject(attribute.range.clone()),
                ),
                Outcome::Deferred => diags.push(
                    Diagnostic::error(
                        "Invalid pipeline attribute",
                        format!("The pipeline {} must be known before the pipeline runs.", attribute.name),
                    )
                    .with_subject(attribute.range.clone()),
                ),
                Outcome::Failed(failed) => diags.extend(failed),
            }
        }

        for nested in &block.blocks {
            match nested.block_type.as_str() {
                "param" => match PipelineParam::decode(nested, ctx) {
                    Ok(param) if pipeline.param(&param.name).is_some() => {
                        diags.push(duplicate("param", &param.name, &nested.range));
                    }
                    Ok(param) => pipeline.params.push(param),
                    Err(failed) => diags.extend(failed),
                },
                "step" => match PipelineStep::from_block(nested, name, ctx) {
                    Ok(step) if pipeline.step(&step.full_name()).is_some() => {
                        diags.push(duplicate("step", &step.full_name(), &nested.range));
                    }
                    Ok(step) => pipeline.steps.push(step),
                    Err(failed) => diags.extend(failed),
                },
                "output" => match PipelineOutput::decode(nested, ctx) {
                    Ok(output) if pipeline.outputs.iter().any(|o| o.name == output.name) => {
                        diags.push(duplicate("output", &output.name, &nested.range));
                    }
                    Ok(output) => pipeline.outputs.push(output),
                    Err(failed) => diags.extend(failed),
                },
                _ => diags.push(unsupported_block(nested, "pipeline")),
            }
        }

        // Dependency checks only make sense over a complete step set.
        if !diags.has_errors() {
            diags.extend(pipeline.validate_dependencies());
            if let Err(PlanError::CycleDetected(detail)) = pipeline.execution_plan() {
                diags.push(Diagnostic::validation("Dependency cycle", detail).with_subject(pipeline.range.clone()));
            }
        }

        if diags.has_errors() {
            return Err(diags);
        }
        tracing::debug!(
            pipeline = %pipeline.name,
            steps = pipeline.steps.len(),
            params = pipeline.params.len(),
            outputs = pipeline.outputs.len(),
            "decoded pipeline"
        );
        Ok(pipeline)
    }

    pub fn param(&self, name: &str) -> Option<&PipelineParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Look up a step by `"<kind>.<name>"`.
    pub fn step(&self, full_name: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.full_name() == full_name)
    }

    /// One diagnostic per edge to a step this pipeline does not declare.
    /// Edges of outputs are checked too.
    pub fn validate_dependencies(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut unknown = |owner: &str, target: &str, range: &SourceRange| {
            if self.step(target).is_none() {
                diags.push(
                    Diagnostic::error(
                        "Unknown step",
                        format!("{owner} depends on step \"{target}\", which is not declared in pipeline \"{}\".", self.name),
                    )
                    .with_subject(range.clone()),
                );
            }
        };
        for step in &self.steps {
            for target in step.depends_on() {
                unknown(&format!("Step \"{}\"", step.full_name()), target, &step.base.range);
            }
        }
        for output in &self.outputs {
            for target in output.depends_on() {
                unknown(&format!("Output \"{}\"", output.name), target, &output.range);
            }
        }
        diags
    }

    /// Group steps into waves: every step's dependencies lie in earlier
    /// waves. Index 0 is the first wave to run.
    pub fn execution_plan(&self) -> Result<Vec<Vec<&PipelineStep>>, PlanError> {
        if self.steps.is_empty() {
            return Ok(vec![]);
        }

        let names: Vec<String> = self.steps.iter().map(PipelineStep::full_name).collect();
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..self.steps.len()).map(|i| graph.add_node(i)).collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();

        // Edge from dependency to dependent.
        for (to, step) in self.steps.iter().enumerate() {
            for dep in step.depends_on() {
                let from = index.get(dep.as_str()).ok_or_else(|| {
                    PlanError::UnknownDependency(format!("step '{}' depends on unknown step '{dep}'", names[to]))
                })?;
                graph.add_edge(nodes[*from], nodes[to], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let step = &names[graph[cycle.node_id()]];
            PlanError::CycleDetected(format!("cycle detected involving step '{step}'"))
        })?;

        let mut depths = vec![0_usize; self.steps.len()];
        for node in sorted {
            let i = graph[node];
            let depth = self.steps[i]
                .depends_on()
                .iter()
                .filter_map(|dep| index.get(dep.as_str()))
                .map(|&d| depths[d] + 1)
                .max()
                .unwrap_or(0);
            depths[i] = depth;
        }

        let max_depth = depths.iter().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<&PipelineStep>> = vec![vec![]; max_depth + 1];
        for (step, depth) in self.steps.iter().zip(&depths) {
            waves[*depth].push(step);
        }
        Ok(waves)
    }

    /// Build the `param` object for one execution: supplied args over
    /// defaults, with every declared type checked.
    pub fn bind_params(&self, args: &BTreeMap<String, Value>) -> Result<Value, Diagnostics> {
        let mut diags = Diagnostics::new();
        let mut bound = BTreeMap::new();
        for param in &self.params {
            match args.get(&param.name).or(param.default.as_ref()) {
                Some(value) if param.accepts(value) => {
                    bound.insert(param.name.clone(), value.clone());
                }
                Some(value) => diags.push(
                    Diagnostic::error(
                        "Invalid param value",
                        format!(
                            "Param \"{}\" must be of type {}, got {}.",
                            param.name,
                            param.param_type,
                            value.type_name()
                        ),
                    )
                    .with_subject(param.range.clone()),
                ),
                None if param.is_required() => diags.push(
                    Diagnostic::error("Missing param", format!("Param \"{}\" is required.", param.name))
                        .with_subject(param.range.clone()),
                ),
                None => {
                    bound.insert(param.name.clone(), Value::Null);
                }
            }
        }
        for name in args.keys().filter(|name| self.param(name).is_none()) {
            diags.push(
                Diagnostic::error(
                    "Unknown param",
                    format!("Pipeline \"{}\" does not declare a param named \"{name}\".", self.name),
                )
                .with_subject(self.range.clone()),
            );
        }
        diags.into_result(Value::Map(bound))
    }

    /// The object visible as `pipeline.<name>` in expressions.
    pub fn to_value(&self) -> Value {
        pipeline_object(&self.name, self.title.as_deref(), self.description.as_deref())
    }
}

/// `{ name, title, description }` for a pipeline reference.
pub fn pipeline_object(name: &str, title: Option<&str>, description: Option<&str>) -> Value {
    let mut object = BTreeMap::from([("name".to_string(), Value::from(name))]);
    if let Some(title) = title {
        object.insert("title".to_string(), Value::from(title));
    }
    if let Some(description) = description {
        object.insert("description".to_string(), Value::from(description));
    }
    Value::Map(object)
}

fn duplicate(what: &str, name: &str, range: &SourceRange) -> Diagnostic {
    Diagnostic::error(
        format!("Duplicate {what}"),
        format!("A {what} named \"{name}\" was already declared in this pipeline."),
    )
    .with_subject(range.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
