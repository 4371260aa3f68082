//! Canned completion backend for tests and offline runs

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use scribe_core::{Result, ScribeError};
use tokio_util::sync::CancellationToken;

use crate::service::CompletionService;
use crate::types::{Completion, CompletionRequest};

/// Replies with queued strings in order and records every request
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push_reply(reply);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(reply.into());
    }

    /// Replies not consumed yet
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }

    /// Every request received so far, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        if cancel.is_cancelled() {
            return Err(ScribeError::Cancelled);
        }

        lock(&self.requests).push(request);
        let reply = lock(&self.replies)
            .pop_front()
            .ok_or_else(|| ScribeError::Completion("no scripted reply left".to_string()))?;

        Ok(Completion::new(reply))
    }
}
