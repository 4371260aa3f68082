//! Analyst stage: request to structured requirements

use std::sync::Arc;

use async_trait::async_trait;
use scribe_agent::{extract_json, CompletionRequest, CompletionService};
use scribe_core::{Requirements, Result, ScribeError};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::complete_for;
use crate::artifact::Artifact;
use crate::context::{keys, RunContext};
use crate::prompt::build_analyst_prompt;
use crate::stage::{ids, unexpected_input, Stage};

/// Turns the raw request into [`Requirements`]
pub struct AnalystStage {
    service: Arc<dyn CompletionService>,
    system_prompt: String,
}

impl AnalystStage {
    pub fn new(service: Arc<dyn CompletionService>, system_prompt: impl Into<String>) -> Self {
        Self {
            service,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl Stage for AnalystStage {
    fn id(&self) -> &str {
        ids::ANALYST
    }

    async fn invoke(
        &self,
        input: Artifact,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let request = match input {
            Artifact::Request(request) => request,
            other => return Err(unexpected_input(ids::ANALYST, "request", &other)),
        };
        if request.trim().is_empty() {
            return Err(ScribeError::InvalidInput(
                "request must not be empty".to_string(),
            ));
        }

        ctx.set(keys::ORIGINAL_QUERY, &request)?;

        let completion = complete_for(
            ids::ANALYST,
            self.service.as_ref(),
            CompletionRequest::new(&self.system_prompt, build_analyst_prompt(&request)).json(),
            cancel,
        )
        .await?;

        let mut requirements: Requirements =
            extract_json(&completion.text).map_err(|e| ScribeError::stage(ids::ANALYST, e))?;
        if requirements.task.trim().is_empty() {
            requirements.task = request.trim().to_string();
        }

        info!(
            "Requirements: {} ({} inputs, {} outputs, {} constraints)",
            requirements.task,
            requirements.inputs.len(),
            requirements.outputs.len(),
            requirements.constraints.len()
        );
        ctx.set(keys::REQUIREMENTS, &requirements)?;

        Ok(requirements.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_agent::ScriptedCompletion;

    #[tokio::test]
    async fn test_parses_requirements_and_records_query() {
        let service = Arc::new(ScriptedCompletion::new().with_reply(
            r#"{"task": "Evaluate 2+2", "inputs": ["2", "2"], "outputs": ["Sum"], "constraints": []}"#,
        ));
        let stage = AnalystStage::new(service.clone(), "SYSTEM");
        let mut ctx = RunContext::new();

        let output = stage
            .invoke(
                Artifact::Request("What is 2+2?".into()),
                &mut ctx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match output {
            Artifact::Requirements(req) => {
                assert_eq!(req.task, "Evaluate 2+2");
                assert_eq!(req.inputs.len(), 2);
            }
            other => panic!("unexpected output: {:?}", other),
        }
        assert_eq!(ctx.get_str(keys::ORIGINAL_QUERY), Some("What is 2+2?"));

        let requests = service.requests();
        assert_eq!(requests[0].system, "SYSTEM");
        assert!(requests[0].json_response);
        assert!(requests[0].prompt.contains("What is 2+2?"));
    }

    #[tokio::test]
    async fn test_blank_request_rejected_without_calling_service() {
        let service = Arc::new(ScriptedCompletion::new());
        let stage = AnalystStage::new(service.clone(), "SYSTEM");

        let err = stage
            .invoke(
                Artifact::Request("   ".into()),
                &mut RunContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::InvalidInput(_)));
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unusable_reply_is_stage_failure() {
        let service = Arc::new(ScriptedCompletion::new().with_reply("I cannot help with that"));
        let stage = AnalystStage::new(service, "SYSTEM");

        let err = stage
            .invoke(
                Artifact::Request("What is 2+2?".into()),
                &mut RunContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::Stage { ref stage, .. } if stage == "analyst"));
    }
}
