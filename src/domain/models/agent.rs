//! Agent domain model and execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle status of a live agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Paused,
    Done,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A live coding agent bound 1:1 to an in-progress task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// The task this agent is executing.
    pub task_id: Uuid,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    /// Private worktree the agent writes into, if any.
    pub worktree_path: Option<PathBuf>,
    /// External process ID, opaque to the core.
    pub pid: Option<u32>,
}

impl Agent {
    /// Create a running agent for a task.
    pub fn new(task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            status: AgentStatus::Running,
            started_at: Utc::now(),
            worktree_path: None,
            pid: None,
        }
    }
}

/// Immutable record of one agent execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Error text when `success` is false.
    pub error: Option<String>,
    pub tokens_used: u64,
    pub cost: f64,
    pub duration: Duration,
    /// Unified diff of the agent's work on its branch.
    pub diff: String,
    pub changed_files: Vec<String>,
    /// Tail of the agent's textual output.
    pub output_excerpt: String,
    pub agent_id: Option<Uuid>,
}

impl ExecutionResult {
    /// Synthesize a failed result from an executor error.
    pub fn failed(agent_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            agent_id: Some(agent_id),
            ..Self::default()
        }
    }
}

/// Progress update forwarded from the external executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProgress {
    pub agent_id: Uuid,
    pub tokens_used: u64,
    pub cost: f64,
    pub duration: Duration,
    pub current_action: String,
}

/// Completion envelope delivered on the spawner's result channel.
#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub result: ExecutionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_running() {
        let task_id = Uuid::new_v4();
        let agent = Agent::new(task_id);
        assert_eq!(agent.status, AgentStatus::Running);
        assert_eq!(agent.task_id, task_id);
        assert!(agent.worktree_path.is_none());
    }

    #[test]
    fn test_failed_result_carries_error() {
        let agent_id = Uuid::new_v4();
        let result = ExecutionResult::failed(agent_id, "executor crashed");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("executor crashed"));
        assert_eq!(result.agent_id, Some(agent_id));
    }
}
