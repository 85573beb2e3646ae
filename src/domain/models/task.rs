//! Task domain model.
//!
//! Tasks are discrete units of work that coding agents execute.
//! They form a DAG with dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but not yet picked up.
    Pending,
    /// Task is currently being executed by an agent.
    InProgress,
    /// Task completed successfully.
    Done,
    /// Task failed during execution.
    Failed,
    /// Task is blocked by a failed dependency.
    Blocked,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "done" | "complete" | "completed" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Capability tier of the agent a task is routed to.
///
/// Orthogonal to the scheduling core: the only behavior hanging off the
/// tier is the override gate for the lowest-capability agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    Quick,
    Scout,
    Builder,
    Architect,
}

impl Default for AgentTier {
    fn default() -> Self {
        Self::Builder
    }
}

impl AgentTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Scout => "scout",
            Self::Builder => "builder",
            Self::Architect => "architect",
        }
    }

    /// Whether failures of this tier feed the override gate.
    pub fn needs_override_gate(&self) -> bool {
        matches!(self, Self::Quick)
    }
}

/// What kind of work this task represents.
///
/// Setup tasks mutate shared project scaffolding and are serialized by
/// the scheduler: at most one setup task runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Setup,
    Normal,
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskKind {
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup)
    }
}

/// A unit of work executed by exactly one coding agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier.
    pub id: Uuid,
    /// Human title; may carry a milestone tag like "M2 wire the API".
    pub title: String,
    /// Description handed to the agent.
    pub description: String,
    /// Acceptance criteria the agent must satisfy.
    pub acceptance_criteria: Vec<String>,
    /// Parent task, if this was split from a larger one.
    pub parent_id: Option<Uuid>,
    /// Current status.
    pub status: TaskStatus,
    /// Reason for Blocked status (e.g. `dependency_failed:<id>`).
    pub blocked_reason: Option<String>,
    /// Prerequisite task IDs.
    pub depends_on: Vec<Uuid>,
    /// Agent currently holding this task. At most one at any time.
    pub assigned_to: Option<Uuid>,
    /// Capability tier this task is routed to.
    pub tier: AgentTier,
    /// Setup vs normal work.
    pub kind: TaskKind,
    /// Path prefixes the task is expected to touch, in declaration order.
    pub file_boundaries: Vec<String>,
    /// Persisted retry counter.
    pub execution_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given title and description.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
            parent_id: None,
            status: TaskStatus::Pending,
            blocked_reason: None,
            depends_on: Vec::new(),
            assigned_to: None,
            tier: AgentTier::default(),
            kind: TaskKind::default(),
            file_boundaries: Vec::new(),
            execution_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Add a prerequisite.
    #[must_use]
    pub fn with_dependency(mut self, dep: Uuid) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Set the expected file boundaries.
    #[must_use]
    pub fn with_file_boundaries<I, S>(mut self, boundaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_boundaries = boundaries.into_iter().map(Into::into).collect();
        self
    }

    /// Set the task kind.
    #[must_use]
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the agent tier.
    #[must_use]
    pub fn with_tier(mut self, tier: AgentTier) -> Self {
        self.tier = tier;
        self
    }

    /// The blocked-reason recorded when a prerequisite fails.
    pub fn dependency_failed_reason(failed: Uuid) -> String {
        format!("dependency_failed:{failed}")
    }
}
