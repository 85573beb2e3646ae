//! Persistence and cross-session tracking ports.
//!
//! Lookup or persistence failures on the learning and tracking ports are
//! never fatal; callers log a warning and continue.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::{ExecutionResult, Task};

/// Durable task state, for resumability and UIs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert one task record.
    async fn save_task(&self, task: &Task) -> anyhow::Result<()>;

    /// Record an execution result for a task.
    async fn save_result(&self, task_id: Uuid, result: &ExecutionResult) -> anyhow::Result<()>;
}

/// Retrieval of prior learnings relevant to a task, and capture of new ones.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn lookup(&self, task: &Task) -> anyhow::Result<Option<String>>;

    async fn capture(&self, task: &Task, result: &ExecutionResult) -> anyhow::Result<()>;
}

/// Cross-session outcome tracking.
#[async_trait]
pub trait SessionTracker: Send + Sync {
    async fn record_outcome(
        &self,
        session_id: Uuid,
        task: &Task,
        success: bool,
    ) -> anyhow::Result<()>;
}
