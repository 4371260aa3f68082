//! Developer stage: code generation and regeneration from feedback
//!
//! Owns the attempt cap for the reject/fail back-edges.

use std::sync::Arc;

use async_trait::async_trait;
use scribe_agent::{extract_code, CompletionRequest, CompletionService};
use scribe_core::{CodeArtifact, Requirements, Result, ScribeError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::complete_for;
use crate::artifact::Artifact;
use crate::context::{keys, RunContext};
use crate::prompt::{
    build_developer_prompt, build_execution_retry_prompt, build_review_retry_prompt,
};
use crate::stage::{ids, unexpected_input, Stage};

const CODE_TAGS: &[&str] = &["javascript", "js"];

/// Generates code for requirements, and regenerates it after a rejection
/// or a failed execution
///
/// The generation count lives in the run context under
/// [`keys::DEVELOPER_ATTEMPTS`]; once `max_attempts` generations have been
/// made (0 = unlimited) a further request fails the run with
/// `AttemptsExhausted`.
pub struct DeveloperStage {
    service: Arc<dyn CompletionService>,
    system_prompt: String,
    max_attempts: usize,
}

impl DeveloperStage {
    pub fn new(
        service: Arc<dyn CompletionService>,
        system_prompt: impl Into<String>,
        max_attempts: usize,
    ) -> Self {
        Self {
            service,
            system_prompt: system_prompt.into(),
            max_attempts,
        }
    }

    fn stored_requirements(ctx: &RunContext) -> Result<Requirements> {
        ctx.get_as(keys::REQUIREMENTS)?.ok_or_else(|| {
            ScribeError::stage(ids::DEVELOPER, "no requirements recorded for this run")
        })
    }

    fn base_prompt(ctx: &RunContext, requirements: &Requirements) -> String {
        ctx.get_str(keys::DEVELOPER_PROMPT)
            .map(str::to_string)
            .unwrap_or_else(|| build_developer_prompt(requirements))
    }

    /// Work out the prompt for this attempt from whatever arrived
    fn prompt_for(&self, input: Artifact, ctx: &mut RunContext) -> Result<(Requirements, String)> {
        match input {
            Artifact::Requirements(requirements) => {
                ctx.set(keys::REQUIREMENTS, &requirements)?;
                let prompt = build_developer_prompt(&requirements);
                ctx.set_once(keys::DEVELOPER_PROMPT, &prompt)?;
                Ok((requirements, prompt))
            }
            Artifact::Review(review) if !review.approved => {
                warn!("Code rejected by review: {}", review.feedback);
                let requirements = Self::stored_requirements(ctx)?;
                let base = Self::base_prompt(ctx, &requirements);
                ctx.set(keys::LAST_FEEDBACK, &review.feedback)?;
                let prompt = build_review_retry_prompt(&base, &review.code, &review.feedback);
                Ok((requirements, prompt))
            }
            Artifact::Execution(outcome) if !outcome.is_success() => {
                let error = outcome.error_message().unwrap_or("unknown error").to_string();
                warn!("Code failed to execute: {}", error);
                let requirements = Self::stored_requirements(ctx)?;
                let base = Self::base_prompt(ctx, &requirements);
                ctx.set(keys::LAST_FEEDBACK, &error)?;
                let prompt = build_execution_retry_prompt(&base, &outcome);
                Ok((requirements, prompt))
            }
            other => Err(unexpected_input(
                ids::DEVELOPER,
                "requirements, rejected review or failed execution",
                &other,
            )),
        }
    }

    fn next_attempt(&self, ctx: &mut RunContext) -> Result<usize> {
        let done = ctx
            .get(keys::DEVELOPER_ATTEMPTS)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        if self.max_attempts > 0 && done >= self.max_attempts {
            let last_feedback = ctx.get_str(keys::LAST_FEEDBACK).unwrap_or("").to_string();
            warn!(
                "Giving up after {} generation attempts",
                self.max_attempts
            );
            return Err(ScribeError::AttemptsExhausted {
                attempts: self.max_attempts,
                last_feedback,
            });
        }

        Ok(ctx.increment(keys::DEVELOPER_ATTEMPTS) as usize)
    }
}

#[async_trait]
impl Stage for DeveloperStage {
    fn id(&self) -> &str {
        ids::DEVELOPER
    }

    async fn invoke(
        &self,
        input: Artifact,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let (requirements, prompt) = self.prompt_for(input, ctx)?;
        let attempt = self.next_attempt(ctx)?;

        ctx.set(keys::LAST_PROMPT, &prompt)?;
        ctx.append(keys::PROMPT_HISTORY, &prompt)?;

        let max_display = if self.max_attempts == 0 {
            "unlimited".to_string()
        } else {
            self.max_attempts.to_string()
        };
        info!("Generating code (attempt {} of {})", attempt, max_display);

        let completion = complete_for(
            ids::DEVELOPER,
            self.service.as_ref(),
            CompletionRequest::new(&self.system_prompt, prompt),
            cancel,
        )
        .await?;

        let code = extract_code(&completion.text, CODE_TAGS);
        if code.trim().is_empty() {
            return Err(ScribeError::stage(
                ids::DEVELOPER,
                "completion reply contained no code",
            ));
        }

        tracing::debug!("Generated code:\n{}", code);
        Ok(CodeArtifact::new(code, requirements, attempt).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_agent::ScriptedCompletion;
    use scribe_core::{ExecutionOutcome, FailureKind, ReviewDecision};
    use std::time::Duration;

    fn code_of(artifact: Artifact) -> CodeArtifact {
        match artifact {
            Artifact::Code(code) => code,
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_records_prompts() {
        let service = Arc::new(ScriptedCompletion::new().with_reply("```javascript\n2 + 2\n```"));
        let stage = DeveloperStage::new(service, "SYSTEM", 5);
        let mut ctx = RunContext::new();

        let code = code_of(
            stage
                .invoke(
                    Requirements::new("Add 2 and 2").into(),
                    &mut ctx,
                    &CancellationToken::new(),
                )
                .await
                .unwrap(),
        );

        assert_eq!(code.code, "2 + 2");
        assert_eq!(code.attempt, 1);
        assert_eq!(code.requirements.task, "Add 2 and 2");

        let base = ctx.get_str(keys::DEVELOPER_PROMPT).unwrap().to_string();
        assert!(base.contains("Add 2 and 2"));
        assert_eq!(ctx.get_str(keys::LAST_PROMPT), Some(base.as_str()));
        assert_eq!(
            ctx.get_as::<Vec<String>>(keys::PROMPT_HISTORY).unwrap().map(|h| h.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_rejection_regenerates_with_feedback() {
        let service = Arc::new(
            ScriptedCompletion::new()
                .with_reply("2 + 3")
                .with_reply("```js\n2 + 2\n```"),
        );
        let stage = DeveloperStage::new(service.clone(), "SYSTEM", 5);
        let mut ctx = RunContext::new();
        let cancel = CancellationToken::new();

        stage
            .invoke(Requirements::new("Add 2 and 2").into(), &mut ctx, &cancel)
            .await
            .unwrap();
        let base = ctx.get_str(keys::DEVELOPER_PROMPT).unwrap().to_string();

        let code = code_of(
            stage
                .invoke(
                    ReviewDecision::reject("2 + 3", "adds the wrong numbers").into(),
                    &mut ctx,
                    &cancel,
                )
                .await
                .unwrap(),
        );

        assert_eq!(code.code, "2 + 2");
        assert_eq!(code.attempt, 2);

        let second_prompt = &service.requests()[1].prompt;
        assert!(second_prompt.contains("adds the wrong numbers"));
        assert!(second_prompt.contains(&base));

        // Base prompt is write-once; the latest prompt is overwritten
        assert_eq!(ctx.get_str(keys::DEVELOPER_PROMPT), Some(base.as_str()));
        assert_eq!(ctx.get_str(keys::LAST_PROMPT), Some(second_prompt.as_str()));
        assert_eq!(ctx.get_str(keys::LAST_FEEDBACK), Some("adds the wrong numbers"));
        assert_eq!(
            ctx.get_as::<Vec<String>>(keys::PROMPT_HISTORY).unwrap().map(|h| h.len()),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_execution_failure_regenerates_with_error() {
        let service = Arc::new(ScriptedCompletion::new().with_reply("a").with_reply("1"));
        let stage = DeveloperStage::new(service.clone(), "SYSTEM", 5);
        let mut ctx = RunContext::new();
        let cancel = CancellationToken::new();

        stage
            .invoke(Requirements::new("one").into(), &mut ctx, &cancel)
            .await
            .unwrap();
        let failed = ExecutionOutcome::failure(
            "a",
            FailureKind::Runtime,
            "ReferenceError: a is not defined",
            Duration::ZERO,
        );
        stage.invoke(failed.into(), &mut ctx, &cancel).await.unwrap();

        assert!(service.requests()[1].prompt.contains("a is not defined"));
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let service = Arc::new(ScriptedCompletion::new().with_reply("1").with_reply("2"));
        let stage = DeveloperStage::new(service, "SYSTEM", 2);
        let mut ctx = RunContext::new();
        let cancel = CancellationToken::new();

        stage
            .invoke(Requirements::new("x").into(), &mut ctx, &cancel)
            .await
            .unwrap();
        stage
            .invoke(ReviewDecision::reject("1", "no").into(), &mut ctx, &cancel)
            .await
            .unwrap();
        let err = stage
            .invoke(ReviewDecision::reject("2", "still no").into(), &mut ctx, &cancel)
            .await
            .unwrap_err();

        match err {
            ScribeError::AttemptsExhausted {
                attempts,
                last_feedback,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_feedback, "still no");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_approved_review_is_not_an_input() {
        let stage = DeveloperStage::new(Arc::new(ScriptedCompletion::new()), "SYSTEM", 5);
        let err = stage
            .invoke(
                ReviewDecision::approve("1", "fine").into(),
                &mut RunContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::StageInputMismatch { .. }));
    }

    #[tokio::test]
    async fn test_empty_reply_is_stage_failure() {
        let service = Arc::new(ScriptedCompletion::new().with_reply("```javascript\n\n```  "));
        let stage = DeveloperStage::new(service, "SYSTEM", 5);
        let err = stage
            .invoke(
                Requirements::new("x").into(),
                &mut RunContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::Stage { .. }));
    }
}
