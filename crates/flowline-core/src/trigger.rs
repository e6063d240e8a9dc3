//! Trigger resources: what starts a pipeline.
//!
//! Triggers go through the same attribute resolver as steps. Their `args`
//! usually reference `self`, the payload the trigger fires with (a request
//! body, captured rows), so `self` defers inside a trigger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::pipeline::{CaptureType, ExecutionMode, ScheduleInterval, TriggerKind, UnknownKeyword};
use flowline_types::value::Value;
use thiserror::Error;

use crate::block::{Attribute, Block, unsupported_block};
use crate::expression::{EvalContext, Expression};
use crate::resolve::{BlockContext, DependencySet, Outcome, ResolutionContext, resolve_attribute};
use crate::step::convert;

pub const ATTRIBUTES: &[&str] = &["title", "description", "enabled", "pipeline", "args"];
pub const SCHEDULE_ATTRIBUTES: &[&str] = &["schedule"];
pub const QUERY_ATTRIBUTES: &[&str] = &["schedule", "sql", "database", "primary_key"];
pub const HTTP_ATTRIBUTES: &[&str] = &["execution_mode"];
pub const CAPTURE_ATTRIBUTES: &[&str] = &["pipeline", "args"];

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule: {0}")]
    Invalid(String),

    #[error("schedule '{0}' never fires again")]
    Exhausted(String),
}

/// A keyword interval or a five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Interval(ScheduleInterval),
    Cron(String),
}

impl Schedule {
    /// Parse and validate a schedule string.
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let text = text.trim();
        if let Ok(interval) = text.parse::<ScheduleInterval>() {
            return Ok(Schedule::Interval(interval));
        }
        let schedule = Schedule::Cron(text.to_string());
        schedule.cron()?;
        Ok(schedule)
    }

    pub fn cron_expression(&self) -> &str {
        match self {
            Schedule::Interval(interval) => interval.cron_expression(),
            Schedule::Cron(expr) => expr,
        }
    }

    fn cron(&self) -> Result<croner::Cron, ScheduleError> {
        let expr = self.cron_expression();
        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError::Invalid(format!(
                "'{expr}' is neither a 5-field cron expression nor one of: {}",
                ScheduleInterval::expected()
            )));
        }
        // Seconds field first.
        format!("0 {expr}")
            .parse::<croner::Cron>()
            .map_err(|e| ScheduleError::Invalid(format!("'{expr}': {e}")))
    }

    /// First fire time strictly after `after`.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.cron()?
            .iter_after(after)
            .next()
            .ok_or_else(|| ScheduleError::Exhausted(self.cron_expression().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Pipeline and args for one row-change type of a query trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCapture {
    pub capture_type: CaptureType,
    pub pipeline: Option<Value>,
    pub args: Option<Value>,
    pub unresolved_attributes: BTreeMap<String, Expression>,
    pub range: SourceRange,
}

impl TriggerCapture {
    pub fn pipeline_name(&self) -> Option<&str> {
        pipeline_name(self.pipeline.as_ref())
    }

    /// Capture args for one firing; `env` binds `self`.
    pub fn get_args(&self, env: &EvalContext) -> Result<Value, Diagnostics> {
        evaluate_args(self.args.as_ref(), &self.unresolved_attributes, env, &self.range)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTrigger {
    pub schedule: Schedule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTrigger {
    pub schedule: Schedule,
    pub sql: Option<String>,
    pub database: Option<String>,
    pub primary_key: String,
    pub captures: BTreeMap<CaptureType, TriggerCapture>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpTrigger {
    pub execution_mode: ExecutionMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    Schedule(ScheduleTrigger),
    Query(QueryTrigger),
    Http(HttpTrigger),
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Schedule(_) => TriggerKind::Schedule,
            TriggerSpec::Query(_) => TriggerKind::Query,
            TriggerSpec::Http(_) => TriggerKind::Http,
        }
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        match self {
            TriggerSpec::Schedule(t) => Some(&t.schedule),
            TriggerSpec::Query(t) => Some(&t.schedule),
            TriggerSpec::Http(_) => None,
        }
    }
}

fn kind_attributes(kind: TriggerKind) -> &'static [&'static str] {
    match kind {
        TriggerKind::Schedule => SCHEDULE_ATTRIBUTES,
        TriggerKind::Query => QUERY_ATTRIBUTES,
        TriggerKind::Http => HTTP_ATTRIBUTES,
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub pipeline: Option<Value>,
    pub args: Option<Value>,
    pub spec: TriggerSpec,
    pub dependencies: DependencySet,
    pub unresolved_attributes: BTreeMap<String, Expression>,
    pub range: SourceRange,
}

impl Trigger {
    /// Decode a `trigger "<kind>" "<name>"` block.
    pub fn from_block(block: &Block, ctx: &ResolutionContext<'_>) -> Result<Self, Diagnostics> {
        let [kind, name] = block.labels.as_slice() else {
            return Err(Diagnostic::error(
                "Invalid trigger block",
                "A trigger block needs two labels: the trigger type and the trigger name.",
            )
            .with_subject(block.range.clone())
            .into());
        };
        let kind: TriggerKind = kind.parse().map_err(|e: UnknownKeyword| {
            Diagnostics::from(Diagnostic::error("Invalid trigger type", e.to_string()).with_subject(block.range.clone()))
        })?;
        let ctx = ctx.in_block(BlockContext::Trigger);

        let allowed: Vec<&str> = ATTRIBUTES.iter().chain(kind_attributes(kind)).copied().collect();
        let mut diags = block.unsupported_attributes(&allowed);
        let mut dependencies = DependencySet::new();
        let mut unresolved = BTreeMap::new();
        let mut values = BTreeMap::new();

        for attribute in block.attributes.iter().filter(|a| allowed.contains(&a.name.as_str())) {
            match attribute.name.as_str() {
                "title" | "description" | "schedule" | "primary_key" | "execution_mode" => {
                    match static_value(attribute, &ctx) {
                        Ok(value) => {
                            values.insert(attribute.name.clone(), value);
                        }
                        Err(failed) => diags.extend(failed),
                    }
                }
                _ => {
                    if let Some(value) = resolve_into(attribute, &ctx, &mut dependencies, &mut unresolved, &mut diags) {
                        values.insert(attribute.name.clone(), value);
                    }
                }
            }
        }

        let mut trigger = Self {
            name: name.clone(),
            title: None,
            description: None,
            enabled: None,
            pipeline: None,
            args: None,
            spec: TriggerSpec::Http(HttpTrigger {
                execution_mode: ExecutionMode::Asynchronous,
            }),
            dependencies,
            unresolved_attributes: unresolved,
            range: block.range.clone(),
        };

        for (attr, value) in &values {
            let subject = block.range.child(attr);
            let set = match attr.as_str() {
                "title" => convert::string(attr, value.clone()).map(|s| trigger.title = Some(s)),
                "description" => convert::string(attr, value.clone()).map(|s| trigger.description = Some(s)),
                "enabled" => convert::boolean(attr, value.clone()).map(|b| trigger.enabled = Some(b)),
                "args" => convert::map(attr, value.clone()).map(|_| trigger.args = Some(value.clone())),
                "pipeline" => {
                    trigger.pipeline = Some(value.clone());
                    Ok(())
                }
                _ => Ok(()),
            };
            if let Err(mismatch) = set {
                diags.push(mismatch.into_diagnostic(&subject));
            }
        }

        if kind != TriggerKind::Query
            && trigger.pipeline.is_none()
            && !trigger.unresolved_attributes.contains_key("pipeline")
        {
            diags.push(missing("pipeline", &block.range));
        }
        if trigger.pipeline.is_some() && trigger.pipeline_name().is_none() {
            diags.push(invalid_pipeline(&block.range.child("pipeline")));
        }

        match decode_spec(kind, block, &values, &ctx, &mut trigger) {
            Ok(spec) => trigger.spec = spec,
            Err(failed) => diags.extend(failed),
        }

        if diags.has_errors() {
            tracing::warn!(trigger = %name, kind = %kind, errors = diags.len(), "trigger rejected");
            return Err(diags);
        }
        tracing::debug!(
            trigger = %name,
            kind = %kind,
            resolved = trigger.is_resolved(),
            credential_depends_on = ?trigger.credential_depends_on(),
            "decoded trigger"
        );
        Ok(trigger)
    }

    pub fn kind(&self) -> TriggerKind {
        self.spec.kind()
    }

    /// `"<kind>.<name>"`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.kind(), self.name)
    }

    /// Disabled only when `enabled = false` resolved statically.
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn pipeline_name(&self) -> Option<&str> {
        pipeline_name(self.pipeline.as_ref())
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved_attributes.is_empty()
    }

    pub fn credential_depends_on(&self) -> &[String] {
        self.dependencies.credential_depends_on()
    }

    /// Trigger args for one firing; `env` binds `self`.
    pub fn get_args(&self, env: &EvalContext) -> Result<Value, Diagnostics> {
        evaluate_args(self.args.as_ref(), &self.unresolved_attributes, env, &self.range)
    }

    /// Next fire time of a schedule or query trigger.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<Result<DateTime<Utc>, ScheduleError>> {
        self.spec.schedule().map(|schedule| schedule.next_run_after(after))
    }
}

fn decode_spec(
    kind: TriggerKind,
    block: &Block,
    values: &BTreeMap<String, Value>,
    ctx: &ResolutionContext<'_>,
    trigger: &mut Trigger,
) -> Result<TriggerSpec, Diagnostics> {
    let mut diags = Diagnostics::new();
    let string_of = |name: &str, diags: &mut Diagnostics| -> Option<String> {
        let value = values.get(name)?.clone();
        convert::string(name, value)
            .map_err(|mismatch| diags.push(mismatch.into_diagnostic(&block.range.child(name))))
            .ok()
    };

    let schedule = match kind {
        TriggerKind::Http => None,
        _ => match string_of("schedule", &mut diags) {
            Some(text) => match Schedule::parse(&text) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    diags.push(
                        Diagnostic::validation("Invalid schedule", e.to_string())
                            .with_subject(block.range.child("schedule")),
                    );
                    None
                }
            },
            None => {
                if block.attribute("schedule").is_none() {
                    diags.push(missing("schedule", &block.range));
                }
                None
            }
        },
    };

    for other in block.blocks.iter().filter(|b| !(kind == TriggerKind::Query && b.block_type == "capture")) {
        diags.push(unsupported_block(other, "trigger"));
    }

    let spec = match (kind, schedule) {
        (TriggerKind::Schedule, Some(schedule)) => Some(TriggerSpec::Schedule(ScheduleTrigger { schedule })),
        (TriggerKind::Query, schedule) => {
            let primary_key = string_of("primary_key", &mut diags).unwrap_or_default();
            if primary_key.trim().is_empty() {
                diags.push(
                    Diagnostic::validation("Invalid query trigger", "primary_key must not be empty.")
                        .with_subject(block.range.child("primary_key")),
                );
            }
            let sql = string_of("sql", &mut diags);
            let database = string_of("database", &mut diags);
            for (name, value) in [("sql", &sql), ("database", &database)] {
                if value.is_none() && block.attribute(name).is_none() {
                    diags.push(missing(name, &block.range));
                }
            }
            let captures = decode_captures(block, ctx, trigger, &mut diags);
            schedule.map(|schedule| {
                TriggerSpec::Query(QueryTrigger {
                    schedule,
                    sql,
                    database,
                    primary_key,
                    captures,
                })
            })
        }
        (TriggerKind::Http, _) => {
            let execution_mode = match string_of("execution_mode", &mut diags) {
                None => Some(ExecutionMode::Asynchronous),
                Some(text) => match text.parse::<ExecutionMode>() {
                    Ok(mode) => Some(mode),
                    Err(e) => {
                        diags.push(
                            Diagnostic::validation("Invalid execution mode", e.to_string())
                                .with_subject(block.range.child("execution_mode")),
                        );
                        None
                    }
                },
            };
            execution_mode.map(|execution_mode| TriggerSpec::Http(HttpTrigger { execution_mode }))
        }
        (TriggerKind::Schedule, None) => None,
    };

    match spec {
        Some(spec) if !diags.has_errors() => Ok(spec),
        _ => Err(diags),
    }
}

fn decode_captures(
    block: &Block,
    ctx: &ResolutionContext<'_>,
    trigger: &mut Trigger,
    diags: &mut Diagnostics,
) -> BTreeMap<CaptureType, TriggerCapture> {
    let mut captures = BTreeMap::new();
    for capture in block.blocks_of_type("capture") {
        let capture_type = match capture.label(0).map(str::parse::<CaptureType>) {
            Some(Ok(capture_type)) => capture_type,
            Some(Err(e)) => {
                diags.push(Diagnostic::validation("Invalid capture type", e.to_string()).with_subject(capture.range.clone()));
                continue;
            }
            None => {
                diags.push(
                    Diagnostic::error("Missing capture type", "A capture block needs a type label.")
                        .with_subject(capture.range.clone()),
                );
                continue;
            }
        };
        if captures.contains_key(&capture_type) {
            diags.push(
                Diagnostic::error(
                    "Duplicate capture",
                    format!("A capture for \"{capture_type}\" was already declared in this trigger."),
                )
                .with_subject(capture.range.clone()),
            );
            continue;
        }
        diags.extend(capture.unsupported_attributes(CAPTURE_ATTRIBUTES));
        for nested in &capture.blocks {
            diags.push(unsupported_block(nested, "capture"));
        }

        let mut decoded = TriggerCapture {
            capture_type,
            pipeline: None,
            args: None,
            unresolved_attributes: BTreeMap::new(),
            range: capture.range.clone(),
        };
        for attribute in capture.attributes.iter().filter(|a| CAPTURE_ATTRIBUTES.contains(&a.name.as_str())) {
            let Some(value) = resolve_into(
                attribute,
                ctx,
                &mut trigger.dependencies,
                &mut decoded.unresolved_attributes,
                diags,
            ) else {
                continue;
            };
            match attribute.name.as_str() {
                "pipeline" if pipeline_name(Some(&value)).is_none() => diags.push(invalid_pipeline(&attribute.range)),
                "pipeline" => decoded.pipeline = Some(value),
                _ => match convert::map(&attribute.name, value.clone()) {
                    Ok(_) => decoded.args = Some(value),
                    Err(mismatch) => diags.push(mismatch.into_diagnostic(&attribute.range)),
                },
            }
        }
        if decoded.pipeline.is_none() && !decoded.unresolved_attributes.contains_key("pipeline") {
            diags.push(missing("pipeline", &capture.range));
        }
        captures.insert(capture_type, decoded);
    }
    captures
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a generic attribute: the value when known now, otherwise the
/// expression is kept in `unresolved`.
fn resolve_into(
    attribute: &Attribute,
    ctx: &ResolutionContext<'_>,
    dependencies: &mut DependencySet,
    unresolved: &mut BTreeMap<String, Expression>,
    diags: &mut Diagnostics,
) -> Option<Value> {
    match resolve_attribute(attribute, ctx).merge_into(dependencies) {
        Outcome::Resolved(value) => Some(value),
        Outcome::Deferred => {
            tracing::debug!(attribute = %attribute.name, "deferring trigger attribute");
            unresolved.insert(attribute.name.clone(), attribute.expr.clone());
            None
        }
        Outcome::Failed(failed) => {
            diags.extend(failed);
            None
        }
    }
}

/// Attributes that configure the trigger itself must be known up front.
fn static_value(attribute: &Attribute, ctx: &ResolutionContext<'_>) -> Result<Value, Diagnostics> {
    match resolve_attribute(attribute, ctx).outcome {
        Outcome::Resolved(value) => Ok(value),
        Outcome::Deferred => Err(Diagnostic::error(
            "Invalid trigger attribute",
            format!("The trigger attribute \"{}\" must be known before the trigger runs.", attribute.name),
        )
        .with_subject(attribute.range.clone())
        .into()),
        Outcome::Failed(failed) => Err(failed),
    }
}

fn evaluate_args(
    args: Option<&Value>,
    unresolved: &BTreeMap<String, Expression>,
    env: &EvalContext,
    range: &SourceRange,
) -> Result<Value, Diagnostics> {
    let subject = range.child("args");
    let value = match (args, unresolved.get("args")) {
        (_, Some(expr)) => expr.evaluate(env).map_err(|d| d.with_subject(&subject))?,
        (Some(value), None) => value.clone(),
        (None, None) => return Ok(Value::Map(BTreeMap::new())),
    };
    convert::map("args", value)
        .map(Value::Map)
        .map_err(|mismatch| mismatch.into_diagnostic(&subject).into())
}

fn pipeline_name(pipeline: Option<&Value>) -> Option<&str> {
    match pipeline? {
        Value::String(name) => Some(name),
        value => value.get("name").and_then(Value::as_str),
    }
}

fn missing(name: &str, range: &SourceRange) -> Diagnostic {
    Diagnostic::error("Missing required argument", format!("The argument \"{name}\" is required."))
        .with_subject(range.clone())
}

fn invalid_pipeline(range: &SourceRange) -> Diagnostic {
    Diagnostic::validation(
        "Invalid pipeline reference",
        "The pipeline attribute must be a pipeline or a pipeline name.",
    )
    .with_subject(range.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_expression, parse_template};
    use crate::pipeline::pipeline_object;
    use chrono::TimeZone;
    use flowline_types::config::ResolverConfig;

    fn env() -> EvalContext {
        EvalContext::new().with_variable("pipeline", Value::map([("nightly", pipeline_object("nightly", None, None))]))
    }

    fn decode(block: &Block) -> Result<Trigger, Diagnostics> {
        let env = env();
        let cfg = ResolverConfig::default();
        Trigger::from_block(block, &ResolutionContext::new(&env, &cfg))
    }

    fn trigger(kind: &str, name: &str) -> Block {
        Block::new("trigger", vec![kind.into(), name.into()])
            .with_attribute("pipeline", parse_template("${pipeline.nightly}").unwrap())
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    // --- Schedules ---

    #[test]
    fn test_schedule_keywords_and_cron() {
        assert_eq!(Schedule::parse("daily").unwrap(), Schedule::Interval(ScheduleInterval::Daily));
        assert_eq!(Schedule::parse("daily").unwrap().cron_expression(), "0 0 * * *");
        assert_eq!(Schedule::parse(" */15 * * * * ").unwrap(), Schedule::Cron("*/15 * * * *".to_string()));
    }

    #[test]
    fn test_malformed_cron_rejected() {
        for text in ["61 * * * *", "* * *", "every tuesday", "* * * * * *"] {
            let err = Schedule::parse(text).unwrap_err();
            assert!(matches!(err, ScheduleError::Invalid(_)), "{text}: {err}");
        }
    }

    #[test]
    fn test_next_run_after() {
        let daily = Schedule::parse("daily").unwrap();
        assert_eq!(daily.next_run_after(at(10, 30)).unwrap(), Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());

        let quarter = Schedule::parse("*/15 * * * *").unwrap();
        assert_eq!(quarter.next_run_after(at(10, 7)).unwrap(), at(10, 15));
        assert_eq!(quarter.next_run_after(at(10, 15)).unwrap(), at(10, 30));

        let hourly = Schedule::parse("hourly").unwrap();
        assert_eq!(hourly.next_run_after(at(23, 59)).unwrap(), Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    // --- Schedule triggers ---

    #[test]
    fn test_schedule_trigger() {
        let block = trigger("schedule", "nightly")
            .with_attribute("schedule", Expression::literal("daily"))
            .with_attribute("title", Expression::literal("Nightly run"));
        let trigger = decode(&block).unwrap();
        assert_eq!(trigger.full_name(), "schedule.nightly");
        assert_eq!(trigger.pipeline_name(), Some("nightly"));
        assert!(trigger.is_enabled());
        assert!(trigger.is_resolved());
        assert_eq!(
            trigger.next_run_after(at(1, 0)).unwrap().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_schedule_trigger_invalid_cron() {
        let block = trigger("schedule", "bad").with_attribute("schedule", Expression::literal("0 25 * * *"));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid schedule"), "got: {msg}");
    }

    #[test]
    fn test_schedule_and_pipeline_required() {
        let block = Block::new("trigger", vec!["schedule".into(), "t".into()]);
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"pipeline\" is required"), "got: {msg}");
        assert!(msg.contains("\"schedule\" is required"), "got: {msg}");
    }

    #[test]
    fn test_unknown_trigger_type() {
        let err = decode(&Block::new("trigger", vec!["webhook".into(), "t".into()])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid trigger type 'webhook'"), "got: {msg}");
    }

    #[test]
    fn test_kind_attribute_not_allowed_elsewhere() {
        let block = trigger("schedule", "t")
            .with_attribute("schedule", Expression::literal("hourly"))
            .with_attribute("execution_mode", Expression::literal("synchronous"));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"execution_mode\" is not expected"), "got: {msg}");
    }

    // --- Http triggers ---

    #[test]
    fn test_http_execution_mode() {
        let t = decode(&trigger("http", "hook")).unwrap();
        assert_eq!(t.spec, TriggerSpec::Http(HttpTrigger { execution_mode: ExecutionMode::Asynchronous }));
        assert!(t.next_run_after(at(0, 0)).is_none());

        let block = trigger("http", "hook").with_attribute("execution_mode", Expression::literal("eventually"));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected one of: synchronous, asynchronous"), "got: {msg}");
    }

    #[test]
    fn test_http_args_reference_self() {
        let block = trigger("http", "hook")
            .with_attribute("args", parse_expression("{ body = self.request_body }").unwrap());
        let trigger = decode(&block).unwrap();
        assert!(!trigger.is_resolved());

        let env = EvalContext::new().with_variable("self", Value::map([("request_body", Value::from("payload"))]));
        let args = trigger.get_args(&env).unwrap();
        assert_eq!(args.get("body"), Some(&Value::from("payload")));
    }

    // --- Query triggers ---

    fn query(name: &str) -> Block {
        Block::new("trigger", vec!["query".into(), name.into()])
            .with_attribute("schedule", Expression::literal("*/5 * * * *"))
            .with_attribute("sql", Expression::literal("select id, name from users"))
            .with_attribute("database", Expression::literal("postgres://localhost/app"))
            .with_attribute("primary_key", Expression::literal("id"))
    }

    #[test]
    fn test_query_trigger_with_captures() {
        let block = query("users").with_block(
            Block::new("capture", vec!["insert".into()])
                .with_attribute("pipeline", parse_template("${pipeline.nightly}").unwrap())
                .with_attribute("args", parse_expression("{ rows = self.inserted_rows }").unwrap()),
        );
        let trigger = decode(&block).unwrap();
        let TriggerSpec::Query(query) = &trigger.spec else {
            panic!("expected query trigger");
        };
        assert_eq!(query.primary_key, "id");
        assert_eq!(query.sql.as_deref(), Some("select id, name from users"));
        let capture = &query.captures[&CaptureType::Insert];
        assert_eq!(capture.pipeline_name(), Some("nightly"));

        let env = EvalContext::new().with_variable("self", Value::map([("inserted_rows", Value::List(vec![]))]));
        assert_eq!(capture.get_args(&env).unwrap().get("rows"), Some(&Value::List(vec![])));
    }

    #[test]
    fn test_query_primary_key_must_not_be_empty() {
        let block = query("users").with_attribute("primary_key", Expression::literal(""));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("primary_key must not be empty"), "got: {msg}");
    }

    #[test]
    fn test_query_capture_type_checked() {
        let block = query("users")
            .with_block(Block::new("capture", vec!["upsert".into()]).with_attribute("pipeline", Expression::literal("nightly")));
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid capture type 'upsert'"), "got: {msg}");
    }

    #[test]
    fn test_duplicate_capture_reported() {
        let capture = Block::new("capture", vec!["delete".into()]).with_attribute("pipeline", Expression::literal("nightly"));
        let block = query("users").with_block(capture.clone()).with_block(capture);
        let err = decode(&block).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Duplicate capture"), "got: {msg}");
    }
}
