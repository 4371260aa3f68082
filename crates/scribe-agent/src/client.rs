//! OpenAI-compatible chat completion client
//!
//! Every request is stateless: a system message plus one user message. No
//! conversation history is kept between calls; stages carry their own
//! state in the run context.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scribe_core::{CompletionConfig, Result, ScribeError};
use tokio_util::sync::CancellationToken;

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::service::CompletionService;
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, Completion, CompletionRequest, ResponseFormat,
};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

// Global circuit breaker - shared across all clients in the process
static CIRCUIT_BREAKER: OnceLock<Arc<CircuitBreaker>> = OnceLock::new();

fn shared_circuit_breaker() -> Arc<CircuitBreaker> {
    Arc::clone(CIRCUIT_BREAKER.get_or_init(|| Arc::new(CircuitBreaker::default())))
}

/// Retry schedule for rate limits and server errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Chat completion client for `/v1/chat/completions`
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    api_key: Option<String>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ChatClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScribeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: chat_endpoint(&config.base_url),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            api_key: auth::get_api_key(&config.api_key_env),
            retry: RetryPolicy::default(),
            breaker: shared_circuit_breaker(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use a dedicated breaker instead of the process-wide one
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(request.system.as_str()),
                ChatMessage::user(request.prompt.as_str()),
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: request.json_response.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response> {
        let mut builder = self.http.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
            .send()
            .await
            .map_err(|e| ScribeError::Completion(format!("Failed to send request: {}", e)))
    }

    async fn request_with_retries(
        &self,
        body: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            tracing::debug!(
                "Sending chat request to {} (attempt {})",
                self.endpoint,
                retries + 1
            );

            let response = match self.send(body).await {
                Ok(response) => response,
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(e);
                }
            };
            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());
                retries += 1;

                if retries > self.retry.max_retries {
                    self.breaker.record_failure();
                    let message = format!(
                        "{} after {} retries. Last error: {}",
                        status, self.retry.max_retries, error_text
                    );
                    return Err(if status.as_u16() == 429 {
                        ScribeError::CompletionLimit(message)
                    } else {
                        ScribeError::Completion(message)
                    });
                }

                tracing::warn!(
                    "Completion service returned {}. Waiting {:?} before retry {}/{}",
                    status,
                    backoff,
                    retries,
                    self.retry.max_retries
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(ScribeError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.retry.max_backoff);
                continue;
            }

            if status.as_u16() == 401 || status.as_u16() == 403 {
                self.breaker.record_failure();
                let error_text = response.text().await.unwrap_or_default();
                return Err(ScribeError::Auth(format!(
                    "Completion service rejected credentials ({}): {}",
                    status, error_text
                )));
            }

            if !status.is_success() {
                self.breaker.record_failure();
                tracing::error!(
                    "Circuit breaker: recorded failure (count: {})",
                    self.breaker.failure_count()
                );
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());
                return Err(ScribeError::Completion(format!(
                    "Completion service error {}: {}",
                    status, error_text
                )));
            }

            let chat: ChatResponse = response
                .json()
                .await
                .map_err(|e| ScribeError::Completion(format!("Failed to parse response: {}", e)))?;

            let text = chat
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|text| !text.trim().is_empty())
                .ok_or_else(|| ScribeError::Completion("No content in response".to_string()))?;

            self.breaker.record_success();

            match &chat.usage {
                Some(usage) => tracing::info!(
                    "Completion received ({} chars, {} prompt tokens, {} completion tokens)",
                    text.len(),
                    usage.prompt_tokens,
                    usage.completion_tokens
                ),
                None => tracing::info!("Completion received ({} chars)", text.len()),
            }

            return Ok(Completion {
                text,
                received_at: Utc::now(),
                usage: chat.usage,
            });
        }
    }
}

#[async_trait]
impl CompletionService for ChatClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        if cancel.is_cancelled() {
            return Err(ScribeError::Cancelled);
        }

        if !self.breaker.can_execute() {
            return Err(ScribeError::CompletionLimit(format!(
                "Circuit breaker is OPEN - too many completion failures. Wait {} seconds before retry.",
                self.breaker.time_until_retry().as_secs()
            )));
        }

        let body = self.build_request(&request);
        tokio::select! {
            _ = cancel.cancelled() => Err(ScribeError::Cancelled),
            result = self.request_with_retries(&body, cancel) => result,
        }
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{}{}", base, CHAT_COMPLETIONS_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> CompletionConfig {
        CompletionConfig {
            base_url: base_url.to_string(),
            api_key_env: "SCRIBE_CLIENT_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_normalisation() {
        assert_eq!(
            chat_endpoint("http://127.0.0.1:55443"),
            "http://127.0.0.1:55443/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:1234/v1/"),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[test]
    fn test_json_requests_set_response_format() {
        let client = ChatClient::new(&config("http://localhost:1")).unwrap();

        let plain = client.build_request(&CompletionRequest::new("sys", "hi"));
        assert!(plain.response_format.is_none());
        assert_eq!(plain.messages.len(), 2);
        assert_eq!(plain.model, "mistralai/mistral-nemo-instruct-2407");

        let json = client.build_request(&CompletionRequest::new("sys", "hi").json());
        let body = serde_json::to_value(&json).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let client = ChatClient::new(&config("http://localhost:1")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .complete(CompletionRequest::new("s", "p"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_open_breaker_refuses_requests() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        breaker.record_failure();
        let client = ChatClient::new(&config("http://localhost:1"))
            .unwrap()
            .with_circuit_breaker(breaker);

        let err = client
            .complete(CompletionRequest::new("s", "p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::CompletionLimit(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_records_failure() {
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
        let client = ChatClient::new(&config("http://127.0.0.1:1"))
            .unwrap()
            .with_circuit_breaker(Arc::clone(&breaker));

        let err = client
            .complete(CompletionRequest::new("s", "p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::Completion(_)));
        assert_eq!(breaker.failure_count(), 1);
    }
}
