//! Coding-agent executor port.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{AgentProgress, AgentTier, ExecutionResult, Task};

/// Callback invoked with executor progress updates.
pub type ProgressCallback = Arc<dyn Fn(AgentProgress) + Send + Sync>;

/// Options forwarded to one agent execution.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub agent_id: Option<Uuid>,
    /// Private branch the agent commits to.
    pub branch: String,
    /// Worktree directory, when the embedder isolates agents on disk.
    pub worktree: Option<PathBuf>,
    /// Enable the executor's quality gates.
    pub quality_gates: bool,
    /// Enable the executor's self-review loop.
    pub self_loop: bool,
    /// Baseline snapshot reference handed to the agent.
    pub baseline: Option<String>,
    /// Prior learnings relevant to this task, when available.
    pub learnings: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("agent_id", &self.agent_id)
            .field("branch", &self.branch)
            .field("worktree", &self.worktree)
            .field("quality_gates", &self.quality_gates)
            .field("self_loop", &self.self_loop)
            .field("baseline", &self.baseline)
            .field(
                "on_progress",
                &self.on_progress.as_ref().map(|_| "Fn(AgentProgress)"),
            )
            .finish()
    }
}

/// Runs one subtask to completion on a given branch/worktree.
///
/// Must respect cancellation of the token; a canceled execution returns an
/// error which the core records as a failed result.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn execute(
        &self,
        token: CancellationToken,
        task: &Task,
        tier: AgentTier,
        opts: ExecuteOptions,
    ) -> anyhow::Result<ExecutionResult>;
}
