//! Fail-open utilities for side channels
//!
//! Use these for operations that must never abort a pipeline run, such as
//! writing run transcripts or forwarding events to an observer.
//!
//! DO NOT use fail-open for:
//! - Stage execution (business logic)
//! - Sandbox runs (correctness)
//! - Configuration loading (state)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use scribe_core::fail_open::fail_open;
/// use scribe_core::Result;
///
/// async fn write_transcript() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("transcript", || write_transcript()).await;
///     // written is None if write_transcript() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
