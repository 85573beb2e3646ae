//! Orchestrator event envelope.
//!
//! Every state transition fans out one of these on the event emitter.
//! Consumers (UIs, persisters) receive a read-only stream; emission is
//! lossy under backpressure, so nothing here may be load-bearing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Kind tag of an orchestrator event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskQueued,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskBlocked,
    AgentProgress,
    MergeStarted,
    MergeCompleted,
    SecondReviewStarted,
    SecondReviewCompleted,
    SessionDone,
    SessionFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskQueued => "task_queued",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskBlocked => "task_blocked",
            Self::AgentProgress => "agent_progress",
            Self::MergeStarted => "merge_started",
            Self::MergeCompleted => "merge_completed",
            Self::SecondReviewStarted => "second_review_started",
            Self::SecondReviewCompleted => "second_review_completed",
            Self::SessionDone => "session_done",
            Self::SessionFailed => "session_failed",
        }
    }
}

/// Tagged event carried on the emitter channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    pub kind: EventKind,
    pub task_id: Option<Uuid>,
    pub task_title: Option<String>,
    pub parent_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub message: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
    pub duration: Option<Duration>,
    pub log_file: Option<String>,
    pub current_action: Option<String>,
}

impl OrchestratorEvent {
    /// Bare event with a message; task/agent fields unset.
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: None,
            task_title: None,
            parent_id: None,
            agent_id: None,
            message: message.into(),
            error: None,
            timestamp: Utc::now(),
            tokens_used: None,
            cost: None,
            duration: None,
            log_file: None,
            current_action: None,
        }
    }

    /// Event about a task.
    pub fn for_task(
        kind: EventKind,
        task_id: Uuid,
        task_title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(kind, message);
        event.task_id = Some(task_id);
        event.task_title = Some(task_title.into());
        event
    }

    #[must_use]
    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = parent_id;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_usage(mut self, tokens: u64, cost: f64, duration: Duration) -> Self {
        self.tokens_used = Some(tokens);
        self.cost = Some(cost);
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.current_action = Some(action.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_event_carries_identity() {
        let id = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let event = OrchestratorEvent::for_task(EventKind::TaskStarted, id, "M1 base", "started")
            .with_agent(agent);
        assert_eq!(event.kind, EventKind::TaskStarted);
        assert_eq!(event.task_id, Some(id));
        assert_eq!(event.task_title.as_deref(), Some("M1 base"));
        assert_eq!(event.agent_id, Some(agent));
    }

    #[test]
    fn test_event_serializes_with_snake_case_kind() {
        let event = OrchestratorEvent::new(EventKind::MergeCompleted, "done");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"merge_completed\""));
    }
}
