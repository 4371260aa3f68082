//! Executor stage: approved code through the sandbox

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use scribe_core::{ExecutionOutcome, Result, ScribeError};
use scribe_sandbox::{SandboxError, ScriptSandbox};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::context::RunContext;
use crate::stage::{ids, unexpected_input, Stage};

/// Runs approved code in the sandbox
///
/// Script failures (compilation, timeout, runtime) become a failed
/// [`ExecutionOutcome`] so the graph can route them back to the Developer.
/// Only cancellation and an unusable sandbox fail the run.
pub struct ExecutorStage {
    sandbox: Arc<ScriptSandbox>,
}

impl ExecutorStage {
    pub fn new(sandbox: Arc<ScriptSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Stage for ExecutorStage {
    fn id(&self) -> &str {
        ids::EXECUTOR
    }

    async fn invoke(
        &self,
        input: Artifact,
        _ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let review = match input {
            Artifact::Review(review) if review.approved => review,
            other => return Err(unexpected_input(ids::EXECUTOR, "approved review", &other)),
        };

        let started = Instant::now();
        let outcome = match self.sandbox.execute(&review.code, cancel).await {
            Ok(success) => {
                info!("Execution succeeded: {} ({:?})", success.value, success.elapsed);
                ExecutionOutcome::success(review.code, success.value, success.elapsed)
            }
            Err(SandboxError::Cancelled) => return Err(ScribeError::Cancelled),
            Err(e) => match e.failure_kind() {
                Some(kind) => {
                    warn!("Execution failed ({}): {}", kind, e);
                    ExecutionOutcome::failure(review.code, kind, e.to_string(), started.elapsed())
                }
                None => return Err(ScribeError::stage(ids::EXECUTOR, e)),
            },
        };

        Ok(outcome.into())
    }
}
