//! # scribe-core
//!
//! Core types for the Scribe code-generation pipeline.
//!
//! A request travels through five stages, each producing one artifact:
//!
//! - Analyst: request -> [`Requirements`]
//! - Developer: requirements or feedback -> [`CodeArtifact`]
//! - Reviewer: code -> [`ReviewDecision`]
//! - Executor: approved code -> [`ExecutionOutcome`]
//! - Presenter: successful outcome -> [`Presentation`]
//!
//! Rejections and failed executions are data, not errors. They flow back to
//! the Developer along explicit edges of the pipeline graph.

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    CompletionConfig, PipelineConfig, SandboxConfig, ScribeConfig, StagePrompts,
};
pub use error::{Result, ScribeError};
pub use types::*;
