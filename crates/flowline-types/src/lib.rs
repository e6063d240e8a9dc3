//! Shared domain types for flowline.
//!
//! This crate holds the vocabulary shared by the resolution core and its
//! callers: dynamic `Value`s, `Diagnostic` batches, step `Output`s, the
//! keyword enums of the configuration language, dependency edges, and the
//! resolver configuration.
//!
//! No evaluation logic lives here -- only serde, thiserror and toml.

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod value;

pub use config::{ResolverConfig, RetryDefaults};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Severity, SourceRange};
pub use error::{ConfigError, InputError};
pub use output::{ErrorDetail, Output, StepError};
pub use pipeline::{DependencyEdge, EdgeKind, StepKind};
pub use value::Value;
