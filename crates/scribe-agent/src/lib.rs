//! # scribe-agent
//!
//! Completion client for the Scribe pipeline.
//!
//! - [`CompletionService`] is the trait stages call; [`ChatClient`] talks to
//!   any OpenAI-compatible `/v1/chat/completions` endpoint and
//!   [`ScriptedCompletion`] replays canned replies.
//! - A process-wide circuit breaker stops retry storms against a service
//!   that keeps failing; 429 and 5xx replies are retried with backoff.
//! - [`extract_code`] and [`extract_json`] turn free-form replies into code
//!   and structured values.

mod auth;
mod circuit_breaker;
mod client;
mod extract;
mod mock;
mod service;
mod types;

pub use auth::get_api_key;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{ChatClient, RetryPolicy};
pub use extract::{extract_code, extract_json};
pub use mock::ScriptedCompletion;
pub use service::CompletionService;
pub use types::*;
