//! Sandbox failure taxonomy and compiler diagnostics

use regex::Regex;
use scribe_core::FailureKind;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A compiler-reported issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Diagnostic {
    /// Error diagnostic, with the position recovered from the engine message
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let (line, column) = parse_position(&message);
        Self {
            severity: Severity::Error,
            message,
            line,
            column,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "({},{}): {}: {}", line, column, self.severity, self.message)
            }
            _ => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

// Engine syntax errors end with "at line N, col M"
fn parse_position(message: &str) -> (Option<u32>, Option<u32>) {
    static POSITION: OnceLock<Option<Regex>> = OnceLock::new();
    let re = POSITION.get_or_init(|| Regex::new(r"line (\d+), col(?:umn)? (\d+)").ok());

    re.as_ref()
        .and_then(|re| re.captures(message))
        .map(|caps| {
            (
                caps.get(1).and_then(|m| m.as_str().parse().ok()),
                caps.get(2).and_then(|m| m.as_str().parse().ok()),
            )
        })
        .unwrap_or((None, None))
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Why a validate or execute call did not succeed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// Empty or whitespace-only code, rejected before any work
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Compilation failed:\n{}", join_diagnostics(.diagnostics))]
    Compilation { diagnostics: Vec<Diagnostic> },

    /// The run missed its deadline
    #[error("Execution timed out after {}ms", .limit.as_millis())]
    Timeout { limit: Duration },

    /// The caller's cancellation token fired
    #[error("Execution cancelled")]
    Cancelled,

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid sandbox configuration: {0}")]
    Config(String),
}

impl SandboxError {
    /// Map onto the pipeline's failure kinds
    ///
    /// Returns `None` for conditions that are not a property of the code
    /// (cancellation, an unavailable sandbox, bad configuration).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::InvalidInput(_) => Some(FailureKind::InvalidInput),
            Self::Compilation { .. } => Some(FailureKind::Compilation),
            Self::Timeout { .. } => Some(FailureKind::Timeout),
            Self::Runtime { .. } => Some(FailureKind::Runtime),
            Self::Cancelled | Self::Unavailable(_) | Self::Config(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
