//! The unit of work the runner schedules

use async_trait::async_trait;
use scribe_core::{Result, ScribeError};
use tokio_util::sync::CancellationToken;

use crate::artifact::Artifact;
use crate::context::RunContext;

/// Identifiers of the standard pipeline stages
pub mod ids {
    pub const ANALYST: &str = "analyst";
    pub const DEVELOPER: &str = "developer";
    pub const REVIEWER: &str = "reviewer";
    pub const EXECUTOR: &str = "executor";
    pub const PRESENTER: &str = "presenter";
}

/// One node of the pipeline graph
///
/// A stage turns its input artifact into an output artifact. It may read and
/// write the run context; it must honour `cancel` at every await point.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique identifier within a graph
    fn id(&self) -> &str;

    async fn invoke(
        &self,
        input: Artifact,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact>;
}

/// Error for an artifact a stage has no handling for
pub fn unexpected_input(stage: &str, expected: &str, found: &Artifact) -> ScribeError {
    ScribeError::StageInputMismatch {
        stage: stage.to_string(),
        expected: expected.to_string(),
        found: found.kind().to_string(),
    }
}
