//! Pipeline domain vocabulary: step kinds, keyword enums, dependency edges.
//!
//! These are the closed sets of names the configuration language accepts.
//! Every enum parses from, and displays as, its configuration keyword.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a keyword is not a member of its enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what} '{value}', expected one of: {expected}")]
pub struct UnknownKeyword {
    pub what: &'static str,
    pub value: String,
    pub expected: String,
}

macro_rules! keyword_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($what:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $keyword:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every member, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The configuration keyword for this member.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $keyword),+
                }
            }

            /// Comma-separated list of accepted keywords, for diagnostics.
            pub fn expected() -> String {
                Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownKeyword;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($keyword => Ok($name::$variant),)+
                    _ => Err(UnknownKeyword {
                        what: $what,
                        value: s.to_string(),
                        expected: Self::expected(),
                    }),
                }
            }
        }
    };
}

keyword_enum! {
    /// The closed set of step kinds.
    StepKind ("step type") {
        Http => "http",
        Sleep => "sleep",
        Email => "email",
        Transform => "transform",
        Query => "query",
        Pipeline => "pipeline",
        Function => "function",
        Container => "container",
        Input => "input",
        Message => "message",
    }
}

keyword_enum! {
    /// Delay growth between retry attempts.
    RetryStrategy ("retry strategy") {
        Constant => "constant",
        Linear => "linear",
        Exponential => "exponential",
    }
}

keyword_enum! {
    /// Kind of interaction an input step asks for.
    InputType ("input type") {
        Button => "button",
        Text => "text",
        Select => "select",
        Multiselect => "multiselect",
    }
}

keyword_enum! {
    /// Presentation style of an input option.
    OptionStyle ("option style") {
        Default => "default",
        Ok => "ok",
        Info => "info",
        Alert => "alert",
    }
}

keyword_enum! {
    /// HTTP methods accepted by http steps.
    HttpMethod ("http method") {
        Get => "get",
        Post => "post",
        Put => "put",
        Patch => "patch",
        Delete => "delete",
        Head => "head",
        Options => "options",
    }
}

keyword_enum! {
    /// Trigger kinds.
    TriggerKind ("trigger type") {
        Schedule => "schedule",
        Query => "query",
        Http => "http",
    }
}

keyword_enum! {
    /// Row change a query trigger capture reacts to.
    CaptureType ("capture type") {
        Insert => "insert",
        Update => "update",
        Delete => "delete",
    }
}

keyword_enum! {
    /// Fixed schedule keywords accepted instead of a cron expression.
    ScheduleInterval ("schedule interval") {
        Hourly => "hourly",
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

keyword_enum! {
    /// How an http trigger answers its caller.
    ExecutionMode ("execution mode") {
        Synchronous => "synchronous",
        Asynchronous => "asynchronous",
    }
}

keyword_enum! {
    /// Declared type of a pipeline parameter.
    ParamType ("param type") {
        String => "string",
        Number => "number",
        Bool => "bool",
        List => "list",
        Map => "map",
        Any => "any",
    }
}

impl ScheduleInterval {
    /// The five-field cron expression this keyword stands for.
    pub fn cron_expression(&self) -> &'static str {
        match self {
            ScheduleInterval::Hourly => "0 * * * *",
            ScheduleInterval::Daily => "0 0 * * *",
            ScheduleInterval::Weekly => "0 0 * * 0",
            ScheduleInterval::Monthly => "0 0 1 * *",
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency edges
// ---------------------------------------------------------------------------

/// Placeholder name for a credential whose name is computed at run time.
pub const DYNAMIC_CREDENTIAL: &str = "<dynamic>";

/// What a dependency edge points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Step,
    Credential,
}

/// An ordering constraint discovered from an expression's free variables.
///
/// Step edges target `"<step_kind>.<step_name>"`; credential edges target
/// `"<cred_kind>.<cred_name>"` or `"<cred_kind>.<dynamic>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub kind: EdgeKind,
    pub target: String,
}

impl DependencyEdge {
    pub fn step(kind: &str, name: &str) -> Self {
        Self {
            kind: EdgeKind::Step,
            target: format!("{kind}.{name}"),
        }
    }

    pub fn credential(kind: &str, name: &str) -> Self {
        Self {
            kind: EdgeKind::Credential,
            target: format!("{kind}.{name}"),
        }
    }

    pub fn dynamic_credential(kind: &str) -> Self {
        Self::credential(kind, DYNAMIC_CREDENTIAL)
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EdgeKind::Step => write!(f, "step.{}", self.target),
            EdgeKind::Credential => write!(f, "credential.{}", self.target),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_keywords_roundtrip() {
        for kind in StepKind::ALL {
            assert_eq!(kind.as_str().parse::<StepKind>().unwrap(), *kind);
        }
        assert_eq!(StepKind::ALL.len(), 10);
    }

    #[test]
    fn test_unknown_keyword_lists_expected() {
        let err = "fibonacci".parse::<RetryStrategy>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid retry strategy 'fibonacci'"), "got: {msg}");
        assert!(msg.contains("constant, linear, exponential"), "got: {msg}");
    }

    #[test]
    fn test_keywords_serialize_snake_case() {
        let json = serde_json::to_string(&InputType::Multiselect).unwrap();
        assert_eq!(json, "\"multiselect\"");
        let parsed: CaptureType = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(parsed, CaptureType::Delete);
    }

    #[test]
    fn test_dependency_edge_targets() {
        assert_eq!(DependencyEdge::step("http", "s1").target, "http.s1");
        assert_eq!(DependencyEdge::dynamic_credential("aws").target, "aws.<dynamic>");
        assert_eq!(DependencyEdge::credential("aws", "prod").to_string(), "credential.aws.prod");
    }

    #[test]
    fn test_schedule_interval_cron() {
        assert_eq!(ScheduleInterval::Daily.cron_expression(), "0 0 * * *");
        assert_eq!("weekly".parse::<ScheduleInterval>().unwrap(), ScheduleInterval::Weekly);
    }
}
