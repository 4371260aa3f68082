//! Presenter stage: execution result to user-facing answer

use std::sync::Arc;

use async_trait::async_trait;
use scribe_agent::{extract_json, CompletionRequest, CompletionService};
use scribe_core::{Presentation, Result, ScribeError};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::complete_for;
use crate::artifact::Artifact;
use crate::context::{keys, RunContext};
use crate::prompt::build_presenter_prompt;
use crate::stage::{ids, unexpected_input, Stage};

#[derive(Debug, Deserialize)]
struct PresentationReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    formatted_result: String,
}

/// Turns a successful execution into the user-facing answer
pub struct PresenterStage {
    service: Arc<dyn CompletionService>,
    system_prompt: String,
}

impl PresenterStage {
    pub fn new(service: Arc<dyn CompletionService>, system_prompt: impl Into<String>) -> Self {
        Self {
            service,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl Stage for PresenterStage {
    fn id(&self) -> &str {
        ids::PRESENTER
    }

    async fn invoke(
        &self,
        input: Artifact,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let outcome = match input {
            Artifact::Execution(outcome) if outcome.is_success() => outcome,
            other => {
                return Err(unexpected_input(
                    ids::PRESENTER,
                    "successful execution",
                    &other,
                ))
            }
        };

        let prompt = build_presenter_prompt(ctx.get_str(keys::ORIGINAL_QUERY), &outcome);
        let completion = complete_for(
            ids::PRESENTER,
            self.service.as_ref(),
            CompletionRequest::new(&self.system_prompt, prompt).json(),
            cancel,
        )
        .await?;

        let reply: PresentationReply =
            extract_json(&completion.text).map_err(|e| ScribeError::stage(ids::PRESENTER, e))?;

        // The computed value is the answer even if the reply left it out
        let formatted_result = if reply.formatted_result.trim().is_empty() {
            outcome
                .return_value()
                .map(|v| v.to_string())
                .unwrap_or_default()
        } else {
            reply.formatted_result
        };

        info!("Presentation ready: {}", formatted_result);
        Ok(Presentation {
            summary: reply.summary,
            formatted_result,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_agent::ScriptedCompletion;
    use scribe_core::{ExecutionOutcome, FailureKind, ScriptValue};
    use std::time::Duration;

    #[tokio::test]
    async fn test_presentation_from_reply() {
        let service = Arc::new(ScriptedCompletion::new().with_reply(
            r#"{"summary": "2 plus 2", "formatted_result": "The answer is 4"}"#,
        ));
        let stage = PresenterStage::new(service.clone(), "SYSTEM");
        let mut ctx = RunContext::new();
        ctx.set(keys::ORIGINAL_QUERY, "What is 2+2?").unwrap();

        let output = stage
            .invoke(
                ExecutionOutcome::success("2 + 2", ScriptValue::Number(4.0), Duration::ZERO)
                    .into(),
                &mut ctx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let presentation = output.into_presentation().unwrap();
        assert_eq!(presentation.formatted_result, "The answer is 4");
        assert!(service.requests()[0].prompt.contains("What is 2+2?"));
    }

    #[tokio::test]
    async fn test_missing_result_falls_back_to_value() {
        let service = Arc::new(ScriptedCompletion::new().with_reply(r#"{"summary": "sum"}"#));
        let stage = PresenterStage::new(service, "SYSTEM");

        let output = stage
            .invoke(
                ExecutionOutcome::success("2 + 2", ScriptValue::Number(4.0), Duration::ZERO)
                    .into(),
                &mut RunContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.into_presentation().unwrap().formatted_result, "4");
    }

    #[tokio::test]
    async fn test_failed_execution_is_not_an_input() {
        let stage = PresenterStage::new(Arc::new(ScriptedCompletion::new()), "SYSTEM");
        let err = stage
            .invoke(
                ExecutionOutcome::failure("x", FailureKind::Runtime, "boom", Duration::ZERO)
                    .into(),
                &mut RunContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::StageInputMismatch { .. }));
    }
}
