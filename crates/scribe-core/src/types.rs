//! Core type definitions for the Scribe pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Language tag attached to generated code
pub const SCRIPT_LANGUAGE: &str = "javascript";

/// Structured task description extracted from a user request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// The computational task to accomplish
    pub task: String,
    /// Data the code works with
    #[serde(default)]
    pub inputs: Vec<String>,
    /// What the code should produce
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Restrictions the code must respect
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl Requirements {
    /// Requirements with only a task
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }
}

/// One generated code candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub code: String,
    pub language: String,
    pub generated_at: DateTime<Utc>,
    /// Requirements this candidate was generated for
    pub requirements: Requirements,
    /// 1-based generation attempt within the run
    pub attempt: usize,
}

impl CodeArtifact {
    pub fn new(code: impl Into<String>, requirements: Requirements, attempt: usize) -> Self {
        Self {
            code: code.into(),
            language: SCRIPT_LANGUAGE.to_string(),
            generated_at: Utc::now(),
            requirements,
            attempt,
        }
    }
}

/// Outcome of reviewing a code candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// The exact code that was reviewed
    pub code: String,
    pub approved: bool,
    pub feedback: String,
}

impl ReviewDecision {
    pub fn approve(code: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            approved: true,
            feedback: feedback.into(),
        }
    }

    pub fn reject(code: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            approved: false,
            feedback: feedback.into(),
        }
    }
}

/// Value produced by the last expression of an executed script
///
/// Consumers stringify it via `Display`. Branching on the variant is
/// reserved for the sandbox itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScriptValue {
    Null,
    Undefined,
    Boolean(bool),
    Number(f64),
    Text(String),
    /// Anything else (objects, arrays, symbols, big integers)
    Other { type_name: String, repr: String },
}

impl ScriptValue {
    /// Name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Other { .. } => "other",
        }
    }
}

impl std::fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Undefined => write!(f, "undefined"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => format_number(*n, f),
            Self::Text(s) => write!(f, "{}", s),
            Self::Other { repr, .. } => write!(f, "{}", repr),
        }
    }
}

// Integral values print without a trailing ".0", like the script engine does
fn format_number(n: f64, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if n.is_nan() {
        write!(f, "NaN")
    } else if n.is_infinite() {
        write!(f, "{}Infinity", if n < 0.0 { "-" } else { "" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{:.0}", n)
    } else {
        write!(f, "{}", n)
    }
}

/// Why a sandboxed run did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    Compilation,
    Timeout,
    Runtime,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Compilation => write!(f, "compilation"),
            Self::Timeout => write!(f, "timeout"),
            Self::Runtime => write!(f, "runtime"),
        }
    }
}

/// Success-with-value or failure-with-message, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { value: ScriptValue },
    Failure { kind: FailureKind, message: String },
}

/// Result of running one code candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The code that was run
    pub code: String,
    pub result: ExecutionResult,
    /// Wall-clock time around the run
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn success(code: impl Into<String>, value: ScriptValue, elapsed: Duration) -> Self {
        Self {
            code: code.into(),
            result: ExecutionResult::Success { value },
            elapsed,
        }
    }

    pub fn failure(
        code: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            code: code.into(),
            result: ExecutionResult::Failure {
                kind,
                message: message.into(),
            },
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ExecutionResult::Success { .. })
    }

    pub fn return_value(&self) -> Option<&ScriptValue> {
        match &self.result {
            ExecutionResult::Success { value } => Some(value),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { message, .. } => Some(message),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.result {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// User-facing summary, the terminal artifact of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    pub summary: String,
    pub formatted_result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_deserialize_with_missing_lists() {
        let req: Requirements =
            serde_json::from_str(r#"{"task": "Evaluate 2+2"}"#).unwrap();
        assert_eq!(req.task, "Evaluate 2+2");
        assert!(req.inputs.is_empty());
        assert!(req.constraints.is_empty());
    }

    #[test]
    fn test_requirements_builder() {
        let req = Requirements::new("Add numbers")
            .with_input("2")
            .with_input("2")
            .with_output("Sum")
            .with_constraint("Integer arithmetic");
        assert_eq!(req.inputs, vec!["2", "2"]);
        assert_eq!(req.outputs, vec!["Sum"]);
        assert_eq!(req.constraints.len(), 1);
    }

    #[test]
    fn test_code_artifact_language() {
        let artifact = CodeArtifact::new("2 + 2", Requirements::new("add"), 1);
        assert_eq!(artifact.language, "javascript");
        assert_eq!(artifact.attempt, 1);
    }

    #[test]
    fn test_script_value_display() {
        assert_eq!(ScriptValue::Number(4.0).to_string(), "4");
        assert_eq!(ScriptValue::Number(-12.0).to_string(), "-12");
        assert_eq!(ScriptValue::Number(0.5).to_string(), "0.5");
        assert_eq!(ScriptValue::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(ScriptValue::Number(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(ScriptValue::Text("hi".into()).to_string(), "hi");
        assert_eq!(ScriptValue::Boolean(true).to_string(), "true");
        assert_eq!(ScriptValue::Null.to_string(), "null");
        assert_eq!(
            ScriptValue::Other {
                type_name: "object".into(),
                repr: "[1,2]".into()
            }
            .to_string(),
            "[1,2]"
        );
    }

    #[test]
    fn test_script_value_serializes_tagged() {
        let json = serde_json::to_value(ScriptValue::Number(4.0)).unwrap();
        assert_eq!(json["kind"], "number");
        assert_eq!(json["value"], 4.0);
    }

    #[test]
    fn test_execution_outcome_views() {
        let ok = ExecutionOutcome::success("2+2", ScriptValue::Number(4.0), Duration::ZERO);
        assert!(ok.is_success());
        assert_eq!(ok.return_value(), Some(&ScriptValue::Number(4.0)));
        assert!(ok.error_message().is_none());
        assert!(ok.failure_kind().is_none());

        let failed = ExecutionOutcome::failure(
            "while(true){}",
            FailureKind::Timeout,
            "Execution timed out after 1000ms",
            Duration::from_secs(1),
        );
        assert!(!failed.is_success());
        assert!(failed.return_value().is_none());
        assert_eq!(failed.failure_kind(), Some(FailureKind::Timeout));
        assert!(failed.error_message().unwrap().contains("timed out"));
    }

    #[test]
    fn test_review_decision_constructors() {
        let approved = ReviewDecision::approve("1", "fine");
        assert!(approved.approved);
        let rejected = ReviewDecision::reject("1", "wrong");
        assert!(!rejected.approved);
        assert_eq!(rejected.code, "1");
    }
}
