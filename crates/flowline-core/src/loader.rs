//! Whole-document loading.
//!
//! A document holds any number of pipelines and triggers. Each resource is
//! resolved on its own: a broken pipeline is reported and skipped, the rest
//! of the document still loads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use flowline_types::config::ResolverConfig;
use flowline_types::diagnostic::{Diagnostic, Diagnostics};
use flowline_types::error::ConfigError;
use flowline_types::value::Value;
use thiserror::Error;

use crate::block::Block;
use crate::decode::{DecodeError, decode_document};
use crate::expression::EvalContext;
use crate::pipeline::{Pipeline, pipeline_object};
use crate::resolve::ResolutionContext;
use crate::trigger::{Trigger, TriggerSpec};

/// Key under which document-level diagnostics are reported.
pub const DOCUMENT: &str = "document";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// At least one resource was rejected.
    #[error("{0}")]
    Invalid(Diagnostics),
}

// ---------------------------------------------------------------------------
// Loaded document
// ---------------------------------------------------------------------------

/// Everything that loaded, plus the diagnostics of what did not.
#[derive(Debug, Clone, Default)]
pub struct LoadedDocument {
    pub pipelines: BTreeMap<String, Pipeline>,
    /// Keyed by `"<kind>.<name>"`.
    pub triggers: BTreeMap<String, Trigger>,
    /// Keyed by resource (`pipeline.<name>`, `trigger.<kind>.<name>`) or
    /// `DOCUMENT`.
    pub diagnostics: BTreeMap<String, Diagnostics>,
}

impl LoadedDocument {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.values().all(|d| !d.has_errors())
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    pub fn trigger(&self, full_name: &str) -> Option<&Trigger> {
        self.triggers.get(full_name)
    }

    /// Every diagnostic, in resource order.
    pub fn all_diagnostics(&self) -> Diagnostics {
        self.diagnostics.values().flat_map(|d| d.iter().cloned()).collect()
    }

    /// Fail when any resource was rejected.
    pub fn into_result(self) -> Result<Self, LoadError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(LoadError::Invalid(self.all_diagnostics()))
        }
    }

    fn report(&mut self, resource: String, diags: Diagnostics) {
        if !diags.is_empty() {
            self.diagnostics.entry(resource).or_default().extend(diags);
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Loader {
    config: ResolverConfig,
}

impl Loader {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Build a loader from a TOML config file; a missing file means defaults.
    pub fn from_config_file(path: &Path) -> Result<Self, LoadError> {
        Ok(Self::new(ResolverConfig::load(path)?))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn load_file(&self, path: &Path) -> Result<LoadedDocument, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = self
            .config
            .filename
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        self.load(&text, Some(&filename))
    }

    pub fn load_str(&self, text: &str) -> Result<LoadedDocument, LoadError> {
        self.load(text, self.config.filename.as_deref())
    }

    fn load(&self, text: &str, filename: Option<&str>) -> Result<LoadedDocument, LoadError> {
        let document = decode_document(text, filename)?;
        let mut loaded = LoadedDocument::default();
        loaded.report(DOCUMENT.to_string(), document.diagnostics);

        let env = definition_env(&document.blocks);
        let ctx = ResolutionContext::new(&env, &self.config);

        for block in document.blocks.iter().filter(|b| b.block_type == "pipeline") {
            let resource = resource_key(block);
            let decode_diags = block.all_diagnostics();
            if decode_diags.has_errors() {
                tracing::warn!(resource = %resource, errors = decode_diags.len(), "pipeline rejected");
                loaded.report(resource, decode_diags);
                continue;
            }
            match Pipeline::from_block(block, &ctx) {
                Ok(pipeline) if loaded.pipelines.contains_key(&pipeline.name) => {
                    loaded.report(resource, duplicate("pipeline", &pipeline.name, block).into());
                }
                Ok(pipeline) => {
                    tracing::info!(pipeline = %pipeline.name, steps = pipeline.steps.len(), "loaded pipeline");
                    loaded.pipelines.insert(pipeline.name.clone(), pipeline);
                }
                Err(diags) => {
                    tracing::warn!(resource = %resource, errors = diags.len(), "pipeline rejected");
                    loaded.report(resource, diags);
                }
            }
        }

        for block in document.blocks.iter().filter(|b| b.block_type == "trigger") {
            let resource = resource_key(block);
            let mut diags = block.all_diagnostics();
            if diags.has_errors() {
                tracing::warn!(resource = %resource, errors = diags.len(), "trigger rejected");
                loaded.report(resource, diags);
                continue;
            }
            let trigger = match Trigger::from_block(block, &ctx) {
                Ok(trigger) => trigger,
                Err(failed) => {
                    loaded.report(resource, failed);
                    continue;
                }
            };
            diags.extend(unknown_pipelines(&trigger, &loaded, block));
            if loaded.triggers.contains_key(&trigger.full_name()) {
                diags.push(duplicate("trigger", &trigger.full_name(), block));
            }
            if diags.has_errors() {
                tracing::warn!(resource = %resource, errors = diags.len(), "trigger rejected");
                loaded.report(resource, diags);
                continue;
            }
            tracing::info!(trigger = %trigger.full_name(), enabled = trigger.is_enabled(), "loaded trigger");
            loaded.triggers.insert(trigger.full_name(), trigger);
        }

        if !loaded.is_ok() {
            tracing::warn!(rejected = loaded.diagnostics.len(), "document loaded with errors");
        }
        Ok(loaded)
    }
}

/// The environment of definition-time resolution: only `pipeline` is bound.
fn definition_env(blocks: &[Block]) -> EvalContext {
    let literal = |block: &Block, name: &str| {
        let value = block.attribute(name)?.expr.evaluate(&EvalContext::new()).ok()?;
        value.as_str().map(str::to_string)
    };
    let pipelines: BTreeMap<String, Value> = blocks
        .iter()
        .filter(|b| b.block_type == "pipeline")
        .filter_map(|b| {
            let name = b.label(0)?;
            let title = literal(b, "title");
            let description = literal(b, "description");
            Some((
                name.to_string(),
                pipeline_object(name, title.as_deref(), description.as_deref()),
            ))
        })
        .collect();
    EvalContext::new().with_variable("pipeline", Value::Map(pipelines))
}

/// Names referenced as plain strings must belong to a loaded pipeline.
fn unknown_pipelines(trigger: &Trigger, loaded: &LoadedDocument, block: &Block) -> Diagnostics {
    let mut names: Vec<&str> = trigger.pipeline_name().into_iter().collect();
    if let TriggerSpec::Query(query) = &trigger.spec {
        names.extend(query.captures.values().filter_map(|c| c.pipeline_name()));
    }
    names
        .into_iter()
        .filter(|name| loaded.pipeline(name).is_none())
        .map(|name| {
            Diagnostic::error(
                "Unknown pipeline",
                format!("Trigger \"{}\" runs pipeline \"{name}\", which was not loaded.", trigger.full_name()),
            )
            .with_subject(block.range.clone())
        })
        .collect()
}

fn resource_key(block: &Block) -> String {
    std::iter::once(block.block_type.as_str())
        .chain(block.labels.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(".")
}

fn duplicate(what: &str, name: &str, block: &Block) -> Diagnostic {
    Diagnostic::error(
        format!("Duplicate {what}"),
        format!("A {what} named \"{name}\" was already loaded."),
    )
    .with_subject(block.range.clone())
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
    title: Fetch
    param:
      url:
        type: string
    step:
      http:
        get:
          url: "${param.url}"
      transform:
        shape:
          value: "${step.http.get.response_body}"
    output:
      body:
        value: "${step.transform.shape.value}"
trigger:
  schedule:
    nightly:
      schedule: daily
      pipeline: "${pipeline.fetch}"
      args:
        url: https://example.com
"#;

    #[test]
    fn test_load_document() {
        let loaded = Loader::default().load_str(DOC).unwrap();
        assert!(loaded.is_ok(), "{}", loaded.all_diagnostics());
        let pipeline = loaded.pipeline("fetch").unwrap();
        assert_eq!(pipeline.title.as_deref(), Some("Fetch"));
        assert_eq!(pipeline.step("transform.shape").unwrap().depends_on(), ["http.get"]);

        let trigger = loaded.trigger("schedule.nightly").unwrap();
        assert_eq!(trigger.pipeline_name(), Some("fetch"));
    }

    #[test]
    fn test_unknown_pipeline_name_reported() {
        let doc = r#"
trigger:
  http:
    hook:
      pipeline: missing
"#;
        let loaded = Loader::default().load_str(doc).unwrap();
        assert!(loaded.triggers.is_empty());
        let msg = loaded.diagnostics["trigger.http.hook"].to_string();
        assert!(msg.contains("runs pipeline \"missing\""), "got: {msg}");
        assert!(matches!(loaded.into_result(), Err(LoadError::Invalid(_))));
    }

    #[test]
    fn test_unknown_root_key_reported() {
        let loaded = Loader::default().load_str("widget:\n  a: 1\n").unwrap();
        assert!(!loaded.is_ok());
        assert!(loaded.diagnostics.contains_key(DOCUMENT));
    }

    #[test]
    fn test_yaml_error() {
        let err = Loader::default().load_str("pipeline: [").unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn test_resource_key() {
        let block = Block::new("trigger", vec!["http".into(), "hook".into()]);
        assert_eq!(resource_key(&block), "trigger.http.hook");
    }
}
