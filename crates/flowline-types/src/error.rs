use thiserror::Error;

use crate::diagnostic::Diagnostics;

/// Errors loading a `ResolverConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors assembling the runtime inputs of a step.
///
/// Missing required fields surface here rather than at definition time: a
/// field absent from the configuration may still be supplied at run time
/// through a deferred expression.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("step '{step}': missing required attribute '{attribute}'")]
    MissingRequired { step: String, attribute: String },

    #[error("step '{step}': attribute '{attribute}' must be {expected}, got {actual}")]
    InvalidType {
        step: String,
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("step '{step}': {message}")]
    Invalid { step: String, message: String },

    #[error("{0}")]
    Evaluation(#[from] Diagnostics),
}
