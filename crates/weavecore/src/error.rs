use crate::StepId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised synchronously to the caller of `execute` and the catalog API
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow not found: {0}")]
    DefinitionNotFound(String),

    #[error("Concurrency limit exceeded: {limit} runs already active")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Engine invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller may retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::ConcurrencyLimitExceeded { .. })
    }
}

/// Definition errors: fatal, never retried
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Cyclic dependency detected: {}", path.join(" -> "))]
    Cycle { path: Vec<StepId> },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("Duplicate step id: {0}")]
    DuplicateStep(StepId),

    #[error("Workflow has no steps")]
    EmptyWorkflow,

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),
}

/// Run-scoped step failures, captured into the step's result record
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepError {
    #[error("Capability failed: {0}")]
    Capability(String),

    #[error("Invalid input: expected {expected}, got {actual}")]
    InvalidInput { expected: String, actual: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Loop exceeded {limit} iterations")]
    LoopLimitExceeded { limit: usize },

    #[error("Sub-step '{step}' failed: {message}")]
    Nested { step: StepId, message: String },

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Step task panicked: {0}")]
    Panicked(String),
}

impl StepError {
    pub fn invalid_input(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        StepError::InvalidInput {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
