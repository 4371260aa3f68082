//! # scribe-orchestrator
//!
//! Stage graph runner and the standard code-generation pipeline.
//!
//! This crate provides:
//! - [`GraphBuilder`] / [`PipelineGraph`]: stages connected by unconditional
//!   or predicate-guarded edges, checked once at build time
//! - [`Runner`]: walks the graph for one run, emitting a [`StageEvent`] per
//!   stage and stopping at a stage with no outgoing edges
//! - The five stages and [`Pipeline`], which wires them with the
//!   reject→regenerate and fail→regenerate back-edges

mod artifact;
mod context;
mod graph;
mod pipeline;
mod prompt;
mod runner;
mod stage;
mod stages;

pub use artifact::Artifact;
pub use context::{keys, RunContext};
pub use graph::{Edge, EdgeCondition, EdgePredicate, GraphBuilder, PipelineGraph};
pub use pipeline::{standard_graph, Pipeline};
pub use prompt::{
    build_analyst_prompt, build_developer_prompt, build_execution_retry_prompt,
    build_presenter_prompt, build_review_retry_prompt, build_reviewer_prompt,
};
pub use runner::{RunOutcome, Runner, StageEvent};
pub use stage::{ids, unexpected_input, Stage};
pub use stages::{AnalystStage, DeveloperStage, ExecutorStage, PresenterStage, ReviewerStage};
