//! The standard Analyst → Developer → Reviewer → Executor → Presenter wiring
//!
//! ```text
//! analyst ──► developer ──► reviewer ──[approved]──► executor ──[succeeded]──► presenter
//!                ▲             │                        │
//!                └─[rejected]──┘                        │
//!                ▲                                      │
//!                └──────────────[failed]────────────────┘
//! ```

use std::sync::Arc;

use scribe_agent::CompletionService;
use scribe_core::{PipelineConfig, Presentation, Result, ScribeError, StagePrompts};
use scribe_sandbox::ScriptSandbox;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::artifact::Artifact;
use crate::graph::{GraphBuilder, PipelineGraph};
use crate::runner::{RunOutcome, Runner, StageEvent};
use crate::stage::ids;
use crate::stages::{AnalystStage, DeveloperStage, ExecutorStage, PresenterStage, ReviewerStage};

fn review_approved(output: &Artifact) -> bool {
    output.as_review().is_some_and(|r| r.approved)
}

fn review_rejected(output: &Artifact) -> bool {
    output.as_review().is_some_and(|r| !r.approved)
}

fn execution_succeeded(output: &Artifact) -> bool {
    output.as_execution().is_some_and(|o| o.is_success())
}

fn execution_failed(output: &Artifact) -> bool {
    output.as_execution().is_some_and(|o| !o.is_success())
}

/// Build the standard five-stage graph
pub fn standard_graph(
    completion: Arc<dyn CompletionService>,
    sandbox: Arc<ScriptSandbox>,
    prompts: &StagePrompts,
    config: &PipelineConfig,
) -> Result<PipelineGraph> {
    GraphBuilder::new(ids::ANALYST)
        .stage(Arc::new(AnalystStage::new(
            Arc::clone(&completion),
            prompts.analyst.as_str(),
        )))
        .stage(Arc::new(DeveloperStage::new(
            Arc::clone(&completion),
            prompts.developer.as_str(),
            config.max_attempts,
        )))
        .stage(Arc::new(ReviewerStage::new(
            Arc::clone(&completion),
            prompts.reviewer.as_str(),
        )))
        .stage(Arc::new(ExecutorStage::new(sandbox)))
        .stage(Arc::new(PresenterStage::new(
            completion,
            prompts.presenter.as_str(),
        )))
        .edge(ids::ANALYST, ids::DEVELOPER)
        .edge(ids::DEVELOPER, ids::REVIEWER)
        .edge_when(ids::REVIEWER, ids::EXECUTOR, "approved", review_approved)
        .edge_when(ids::REVIEWER, ids::DEVELOPER, "rejected", review_rejected)
        .edge_when(ids::EXECUTOR, ids::PRESENTER, "succeeded", execution_succeeded)
        .edge_when(ids::EXECUTOR, ids::DEVELOPER, "failed", execution_failed)
        .build()
}

/// Entry point for answering a request end to end
#[derive(Clone)]
pub struct Pipeline {
    runner: Runner,
}

impl Pipeline {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        sandbox: Arc<ScriptSandbox>,
        prompts: &StagePrompts,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let graph = standard_graph(completion, sandbox, prompts, config)?;
        Ok(Self {
            runner: Runner::new(graph).with_max_steps(config.max_steps),
        })
    }

    pub fn with_observer(mut self, observer: UnboundedSender<StageEvent>) -> Self {
        self.runner = self.runner.with_observer(observer);
        self
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Run a request and return the full outcome with its event trail
    pub async fn run(&self, request: &str, cancel: &CancellationToken) -> Result<RunOutcome> {
        if request.trim().is_empty() {
            return Err(ScribeError::InvalidInput(
                "request must not be empty".to_string(),
            ));
        }
        self.runner
            .run(Artifact::Request(request.to_string()), cancel)
            .await
    }

    /// Run a request and return just the presentation
    pub async fn run_pipeline(
        &self,
        request: &str,
        cancel: &CancellationToken,
    ) -> Result<Presentation> {
        let outcome = self.run(request, cancel).await?;
        let kind = outcome.output.kind();
        outcome.output.into_presentation().ok_or_else(|| {
            ScribeError::Other(format!("run ended with {} instead of a presentation", kind))
        })
    }
}
