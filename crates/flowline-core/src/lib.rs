//! Definition-time resolution for flowline pipeline documents.
//!
//! Documents are decoded into `Block` trees, then every pipeline, step,
//! output and trigger attribute goes through staged resolution: it is either
//! evaluated now, deferred until run time, or reported. Deferred step and
//! credential references become dependency edges, from which
//! `Pipeline::execution_plan` derives the order steps run in.
//!
//! Within the workspace it depends only on `flowline-types`; it performs no I/O beyond
//! reading documents in `loader`.

pub mod block;
pub mod decode;
pub mod expression;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod resolve;
pub mod step;
pub mod trigger;

pub use loader::{LoadError, LoadedDocument, Loader};
pub use pipeline::{Pipeline, PipelineParam, PlanError};
pub use step::{PipelineStep, StepSpec};
pub use trigger::{Schedule, Trigger, TriggerSpec};
