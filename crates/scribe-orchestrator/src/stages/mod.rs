//! The five standard pipeline stages

mod analyst;
mod developer;
mod executor;
mod presenter;
mod reviewer;

pub use analyst::AnalystStage;
pub use developer::DeveloperStage;
pub use executor::ExecutorStage;
pub use presenter::PresenterStage;
pub use reviewer::ReviewerStage;

use scribe_agent::{Completion, CompletionRequest, CompletionService};
use scribe_core::{Result, ScribeError};
use tokio_util::sync::CancellationToken;

/// Call the completion service on behalf of `stage`
///
/// Collaborator failures are reported as failures of the stage; cancellation
/// passes through untouched.
pub(crate) async fn complete_for(
    stage: &str,
    service: &dyn CompletionService,
    request: CompletionRequest,
    cancel: &CancellationToken,
) -> Result<Completion> {
    tracing::debug!("[{}] prompt:\n{}", stage, request.prompt);
    match service.complete(request, cancel).await {
        Ok(completion) => {
            tracing::debug!("[{}] reply:\n{}", stage, completion.text);
            Ok(completion)
        }
        Err(ScribeError::Cancelled) => Err(ScribeError::Cancelled),
        Err(e) => Err(ScribeError::stage(stage, e)),
    }
}
