//! Unified error types for Scribe

use thiserror::Error;

/// Unified error type for all Scribe operations
#[derive(Error, Debug)]
pub enum ScribeError {
    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Completion service errors
    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Completion service limit: {0}")]
    CompletionLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Stage errors
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Stage '{stage}' cannot handle {found} (expected {expected})")]
    StageInputMismatch {
        stage: String,
        expected: String,
        found: String,
    },

    #[error("Gave up after {attempts} code generation attempts. Last feedback: {last_feedback}")]
    AttemptsExhausted {
        attempts: usize,
        last_feedback: String,
    },

    // Graph and routing errors
    #[error("Invalid pipeline graph: {0}")]
    InvalidGraph(String),

    #[error("No route out of stage '{stage}' for {artifact}")]
    NoRoute { stage: String, artifact: String },

    #[error("Ambiguous route out of stage '{stage}': edges {edges:?} all matched")]
    AmbiguousRoute { stage: String, edges: Vec<String> },

    #[error("Step limit exceeded: {0} stage invocations")]
    StepLimit(usize),

    #[error("Run cancelled")]
    Cancelled,

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl ScribeError {
    /// Wrap a collaborator failure as a failure of the named stage
    pub fn stage(stage: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error came from caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using ScribeError
pub type Result<T> = std::result::Result<T, ScribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_message() {
        let err = ScribeError::stage("analyst", "no data returned");
        assert_eq!(err.to_string(), "Stage 'analyst' failed: no data returned");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled() {
        assert!(ScribeError::Cancelled.is_cancelled());
    }
}
