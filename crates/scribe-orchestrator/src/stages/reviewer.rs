//! Reviewer stage: approve or reject generated code

use std::sync::Arc;

use async_trait::async_trait;
use scribe_agent::{extract_json, CompletionRequest, CompletionService};
use scribe_core::{Result, ReviewDecision, ScribeError};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::complete_for;
use crate::artifact::Artifact;
use crate::context::{keys, RunContext};
use crate::prompt::build_reviewer_prompt;
use crate::stage::{ids, unexpected_input, Stage};

#[derive(Debug, Deserialize)]
struct ReviewReply {
    approved: bool,
    #[serde(default, alias = "feedback")]
    comments: String,
}

/// Approves or rejects generated code
pub struct ReviewerStage {
    service: Arc<dyn CompletionService>,
    system_prompt: String,
}

impl ReviewerStage {
    pub fn new(service: Arc<dyn CompletionService>, system_prompt: impl Into<String>) -> Self {
        Self {
            service,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl Stage for ReviewerStage {
    fn id(&self) -> &str {
        ids::REVIEWER
    }

    async fn invoke(
        &self,
        input: Artifact,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let artifact = match input {
            Artifact::Code(artifact) => artifact,
            other => return Err(unexpected_input(ids::REVIEWER, "code", &other)),
        };

        let prompt = build_reviewer_prompt(
            ctx.get_str(keys::ORIGINAL_QUERY),
            &artifact.requirements,
            &artifact.code,
        );
        let completion = complete_for(
            ids::REVIEWER,
            self.service.as_ref(),
            CompletionRequest::new(&self.system_prompt, prompt).json(),
            cancel,
        )
        .await?;

        let reply: ReviewReply =
            extract_json(&completion.text).map_err(|e| ScribeError::stage(ids::REVIEWER, e))?;

        info!(
            "Review of attempt {}: {}",
            artifact.attempt,
            if reply.approved { "approved" } else { "rejected" }
        );

        let decision = if reply.approved {
            ReviewDecision::approve(artifact.code, reply.comments)
        } else {
            ReviewDecision::reject(artifact.code, reply.comments)
        };
        Ok(decision.into())
    }
}
