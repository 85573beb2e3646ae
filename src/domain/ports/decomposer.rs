//! Task decomposer port.

use async_trait::async_trait;

use crate::domain::models::{AgentTier, TaskKind};

/// One subtask produced by the external decomposer.
///
/// `depends_on` entries reference other subtasks by title (or textual ID);
/// they are resolved to task IDs during graph build, which fails with an
/// unknown-dependency error otherwise. Titles are unique within a request.
#[derive(Debug, Clone)]
pub struct SubtaskSpec {
    pub title: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub file_boundaries: Vec<String>,
    pub kind: TaskKind,
    /// Routing hint; defaults when the decomposer does not set one.
    pub tier: Option<AgentTier>,
}

impl SubtaskSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            depends_on: Vec::new(),
            acceptance_criteria: Vec::new(),
            file_boundaries: Vec::new(),
            kind: TaskKind::Normal,
            tier: None,
        }
    }
}

/// Turns a natural-language change request into structured subtasks.
///
/// Empty output is an error; the session fails.
#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    async fn decompose(&self, request: &str) -> anyhow::Result<Vec<SubtaskSpec>>;
}
