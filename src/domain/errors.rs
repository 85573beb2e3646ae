//! Domain errors for the orchestrator core.

use thiserror::Error;
use uuid::Uuid;

use super::models::graph::GraphError;

/// Domain-level errors that can occur in the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Decomposer produced no tasks")]
    EmptyDecomposition,

    #[error("Decomposition failed: {0}")]
    DecompositionFailed(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("VCS operation failed: {0}")]
    Vcs(String),

    #[error("Merge failed: {0}")]
    MergeFailed(String),

    #[error("Semantic merge failed: {0}")]
    SemanticMerge(String),

    #[error("Post-merge verification failed: {0}")]
    Verification(String),

    #[error("Invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: String },

    #[error("Orchestrator stopped")]
    Stopped,

    #[error("Operation canceled")]
    Canceled,

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationFailed(err.to_string())
    }
}
