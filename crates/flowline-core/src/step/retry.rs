//! The `retry` block of a step.
//!
//! A retry block usually references `result` in its `if` predicate and is
//! then deferred; the step keeps the raw block and the engine re-decodes it
//! after every attempt with [`RetryConfig::resolve`].

use std::time::Duration;

use flowline_types::config::RetryDefaults;
use flowline_types::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use flowline_types::pipeline::RetryStrategy;
use serde::{Deserialize, Serialize};

use super::convert;
use crate::block::Block;
use crate::expression::EvalContext;
use crate::resolve::{BlockContext, BodyValues, Outcome, Resolution, ResolutionContext, evaluate_body, resolve_body};

pub const ATTRIBUTES: &[&str] = &["if", "max_attempts", "strategy", "min_interval", "max_interval"];

const MAX_ATTEMPTS_LIMIT: i64 = 300;
const MIN_INTERVAL_LIMIT_MS: i64 = 100_000;
const MAX_INTERVAL_LIMIT_MS: i64 = 1_000_000;

/// Decoded `retry` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// The block's `if` predicate; `None` means always retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub max_attempts: i64,
    /// Kept verbatim; `validate` checks membership.
    pub strategy: String,
    pub min_interval_ms: i64,
    pub max_interval_ms: i64,
}

impl RetryConfig {
    pub fn new(defaults: &RetryDefaults) -> Self {
        Self {
            enabled: None,
            max_attempts: defaults.max_attempts,
            strategy: defaults.strategy.to_string(),
            min_interval_ms: defaults.min_interval_ms,
            max_interval_ms: defaults.max_interval_ms,
        }
    }

    /// Build a config from evaluated body values, then validate it.
    pub fn from_values(
        values: &BodyValues,
        defaults: &RetryDefaults,
        range: &SourceRange,
    ) -> Result<Self, Diagnostics> {
        let mut config = Self::new(defaults);
        let mut diags = Diagnostics::new();
        for (name, value) in values {
            let value = value.clone();
            let set = match name.as_str() {
                "if" if value.is_null() => Ok(()),
                "if" => convert::boolean(name, value).map(|b| config.enabled = Some(b)),
                "max_attempts" => convert::integer(name, value).map(|n| config.max_attempts = n),
                "strategy" => convert::string(name, value).map(|s| config.strategy = s),
                "min_interval" => convert::integer(name, value).map(|n| config.min_interval_ms = n),
                "max_interval" => convert::integer(name, value).map(|n| config.max_interval_ms = n),
                _ => Ok(()),
            };
            if let Err(mismatch) = set {
                diags.push(mismatch.into_diagnostic(&range.child(name)));
            }
        }
        diags.extend(config.validate(range));
        diags.into_result(config)
    }

    /// Report every violated bound.
    pub fn validate(&self, range: &SourceRange) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut invalid = |attribute: &str, detail: String| {
            diags.push(Diagnostic::validation("Invalid retry configuration", detail).with_subject(range.child(attribute)));
        };

        if self.max_attempts > MAX_ATTEMPTS_LIMIT {
            invalid(
                "max_attempts",
                format!("max_attempts must be at most {MAX_ATTEMPTS_LIMIT}, got {}.", self.max_attempts),
            );
        }
        if !(0..=MIN_INTERVAL_LIMIT_MS).contains(&self.min_interval_ms) {
            invalid(
                "min_interval",
                format!(
                    "min_interval must be between 0 and {MIN_INTERVAL_LIMIT_MS} ms, got {}.",
                    self.min_interval_ms
                ),
            );
        }
        if !(0..=MAX_INTERVAL_LIMIT_MS).contains(&self.max_interval_ms) {
            invalid(
                "max_interval",
                format!(
                    "max_interval must be between 0 and {MAX_INTERVAL_LIMIT_MS} ms, got {}.",
                    self.max_interval_ms
                ),
            );
        }
        if self.min_interval_ms >= self.max_interval_ms {
            invalid(
                "min_interval",
                format!(
                    "min_interval ({}) must be less than max_interval ({}).",
                    self.min_interval_ms, self.max_interval_ms
                ),
            );
        }
        if let Err(e) = self.strategy.parse::<RetryStrategy>() {
            invalid("strategy", e.to_string());
        }
        diags
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// constant: `min`; linear: `min * attempt`; exponential:
    /// `min * attempt^2`; growth is capped at `max`.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let min = self.min_interval_ms.max(0) as u64;
        let max = self.max_interval_ms.max(0) as u64;
        let attempt = u64::from(attempt.max(1));
        let millis = match self.strategy.parse::<RetryStrategy>() {
            Ok(RetryStrategy::Linear) => min.saturating_mul(attempt).min(max),
            Ok(RetryStrategy::Exponential) => min.saturating_mul(attempt.saturating_mul(attempt)).min(max),
            _ => min,
        };
        Duration::from_millis(millis)
    }

    /// Whether another attempt should follow attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled != Some(false) && i64::from(attempt) < self.max_attempts
    }

    /// Resolve a `retry` block at definition time.
    pub fn decode(block: &Block, ctx: &ResolutionContext<'_>) -> Resolution<Self> {
        let unsupported = block.unsupported_attributes(ATTRIBUTES);
        if !unsupported.is_empty() {
            return Resolution::failed(unsupported);
        }

        let ctx = ctx.in_block(BlockContext::Retry);
        let Resolution { outcome, dependencies } = resolve_body(block, &ctx);
        match outcome {
            Outcome::Resolved(values) => {
                match Self::from_values(&values, &ctx.config.retry_defaults, &block.range) {
                    Ok(config) => Resolution {
                        outcome: Outcome::Resolved(config),
                        dependencies,
                    },
                    Err(diags) => Resolution::failed(diags),
                }
            }
            Outcome::Deferred => Resolution::deferred(dependencies),
            Outcome::Failed(diags) => Resolution::failed(diags),
        }
    }

    /// Re-decode a retained `retry` block against a runtime environment.
    pub fn resolve(block: &Block, env: &EvalContext, defaults: &RetryDefaults) -> Result<Self, Diagnostics> {
        let unsupported = block.unsupported_attributes(ATTRIBUTES);
        if !unsupported.is_empty() {
            return Err(unsupported);
        }
        let values = evaluate_body(block, env)?;
        Self::from_values(&values, defaults, &block.range)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Expression, parse_template};
    use flowline_types::config::ResolverConfig;
    use flowline_types::value::Value;

    fn config(strategy: &str, min: i64, max: i64) -> RetryConfig {
        RetryConfig {
            enabled: None,
            max_attempts: 5,
            strategy: strategy.to_string(),
            min_interval_ms: min,
            max_interval_ms: max,
        }
    }

    fn millis(config: &RetryConfig, attempts: std::ops::RangeInclusive<u32>) -> Vec<u128> {
        attempts.map(|a| config.calculate_backoff(a).as_millis()).collect()
    }

    // --- Backoff ---

    #[test]
    fn test_exponential_backoff_capped() {
        let retry = config("exponential", 1000, 10_000);
        assert_eq!(millis(&retry, 1..=4), vec![1000, 4000, 9000, 10_000]);
    }

    #[test]
    fn test_linear_and_constant_backoff() {
        assert_eq!(millis(&config("linear", 500, 1200), 1..=3), vec![500, 1000, 1200]);
        assert_eq!(millis(&config("constant", 250, 1000), 1..=3), vec![250, 250, 250]);
    }

    #[test]
    fn test_should_retry_respects_predicate() {
        let mut retry = config("constant", 1, 2);
        assert!(retry.should_retry(4));
        assert!(!retry.should_retry(5));
        retry.enabled = Some(false);
        assert!(!retry.should_retry(1));
    }

    // --- Validation ---

    #[test]
    fn test_validate_reports_all_bounds() {
        let mut retry = config("constant", 5000, 1000);
        retry.max_attempts = 301;
        let diags = retry.validate(&SourceRange::default());
        assert_eq!(diags.len(), 2);
        let msg = diags.to_string();
        assert!(msg.contains("at most 300"), "got: {msg}");
        assert!(msg.contains("must be less than max_interval"), "got: {msg}");
    }

    #[test]
    fn test_validate_unknown_strategy() {
        let diags = config("fibonacci", 1, 2).validate(&SourceRange::default());
        assert_eq!(diags.len(), 1);
        let msg = diags.to_string();
        assert!(msg.contains("constant, linear, exponential"), "got: {msg}");
    }

    // --- Decoding ---

    #[test]
    fn test_decode_static_block_uses_defaults() {
        let env = EvalContext::new();
        let cfg = ResolverConfig::default();
        let ctx = ResolutionContext::new(&env, &cfg);
        let block = Block::new("retry", vec![]).with_attribute("max_attempts", Expression::literal(5_i64));
        let Outcome::Resolved(retry) = RetryConfig::decode(&block, &ctx).outcome else {
            panic!("expected resolved");
        };
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.strategy, "constant");
        assert_eq!(retry.min_interval_ms, 1000);
    }

    #[test]
    fn test_decode_defers_on_result_then_resolves() {
        let env = EvalContext::new();
        let cfg = ResolverConfig::default();
        let ctx = ResolutionContext::new(&env, &cfg);
        let block = Block::new("retry", vec![])
            .with_attribute("if", parse_template("${result.status_code >= 500}").unwrap())
            .with_attribute("strategy", Expression::literal("linear"));
        let res = RetryConfig::decode(&block, &ctx);
        assert!(res.is_deferred());

        let runtime = EvalContext::new().with_variable("result", Value::map([("status_code", Value::from(503_i64))]));
        let retry = RetryConfig::resolve(&block, &runtime, &cfg.retry_defaults).unwrap();
        assert_eq!(retry.enabled, Some(true));
        assert_eq!(retry.strategy, "linear");
    }

    #[test]
    fn test_decode_rejects_unknown_attribute() {
        let env = EvalContext::new();
        let cfg = ResolverConfig::default();
        let ctx = ResolutionContext::new(&env, &cfg);
        let block = Block::new("retry", vec![]).with_attribute("attempts", Expression::literal(2_i64));
        let Outcome::Failed(diags) = RetryConfig::decode(&block, &ctx).outcome else {
            panic!("expected failure");
        };
        let msg = diags.to_string();
        assert!(msg.contains("Unsupported attribute"), "got: {msg}");
    }
}
