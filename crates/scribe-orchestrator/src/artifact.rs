//! Values that flow along pipeline edges

use scribe_core::{CodeArtifact, ExecutionOutcome, Presentation, Requirements, ReviewDecision};
use serde::{Deserialize, Serialize};

/// Output of one stage, input of the next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    /// Raw user request, the entry input
    Request(String),
    Requirements(Requirements),
    Code(CodeArtifact),
    Review(ReviewDecision),
    Execution(ExecutionOutcome),
    Presentation(Presentation),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Requirements(_) => "requirements",
            Self::Code(_) => "code",
            Self::Review(_) => "review",
            Self::Execution(_) => "execution",
            Self::Presentation(_) => "presentation",
        }
    }

    pub fn as_review(&self) -> Option<&ReviewDecision> {
        match self {
            Self::Review(review) => Some(review),
            _ => None,
        }
    }

    pub fn as_execution(&self) -> Option<&ExecutionOutcome> {
        match self {
            Self::Execution(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn into_presentation(self) -> Option<Presentation> {
        match self {
            Self::Presentation(presentation) => Some(presentation),
            _ => None,
        }
    }
}

impl From<Requirements> for Artifact {
    fn from(value: Requirements) -> Self {
        Self::Requirements(value)
    }
}

impl From<CodeArtifact> for Artifact {
    fn from(value: CodeArtifact) -> Self {
        Self::Code(value)
    }
}

impl From<ReviewDecision> for Artifact {
    fn from(value: ReviewDecision) -> Self {
        Self::Review(value)
    }
}

impl From<ExecutionOutcome> for Artifact {
    fn from(value: ExecutionOutcome) -> Self {
        Self::Execution(value)
    }
}

impl From<Presentation> for Artifact {
    fn from(value: Presentation) -> Self {
        Self::Presentation(value)
    }
}
