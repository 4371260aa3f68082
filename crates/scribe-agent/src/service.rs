//! The seam between pipeline stages and whatever produces completions

use async_trait::async_trait;
use scribe_core::Result;
use tokio_util::sync::CancellationToken;

use crate::types::{Completion, CompletionRequest};

/// A text completion backend
///
/// Implementations must return `ScribeError::Cancelled` promptly once
/// `cancel` fires.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion>;
}
