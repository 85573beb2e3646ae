//! Merge pipeline domain types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A request to integrate one agent branch into the target branch.
///
/// Produced by the run loop on task success, consumed exactly once by the
/// serialized merge worker.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    /// Private branch holding the agent's work.
    pub branch: String,
    /// Cancels the current merge attempt, including retry backoff.
    pub token: CancellationToken,
}

/// Final outcome of processing one merge request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub reason: String,
    pub error: Option<String>,
    /// True when the semantic or structural fallback path produced the commit.
    pub fallback_used: bool,
    pub conflict_files: Vec<String>,
}

impl MergeOutcome {
    pub fn succeeded(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>, conflict_files: Vec<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            conflict_files,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn via_fallback(mut self) -> Self {
        self.fallback_used = true;
        self
    }
}

/// Result of the VCS driver's native merge attempt.
#[derive(Debug, Clone, Default)]
pub struct NativeMergeOutcome {
    pub success: bool,
    /// True when the failure is a content conflict a semantic merge could resolve.
    pub needs_semantic_merge: bool,
    pub conflict_files: Vec<String>,
    /// Diff of the merge when available.
    pub diff: Option<String>,
    pub changed_files: Vec<String>,
}

/// One conflicted file with both sides' contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictFile {
    pub path: String,
    /// Content on the target (session) branch.
    pub ours: String,
    /// Content on the agent branch.
    pub theirs: String,
    /// Merge-base content when available.
    pub base: Option<String>,
}

/// A conflict rendered for a human resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictPresentation {
    pub task_id: Uuid,
    pub branch: String,
    pub path: String,
    pub ours: String,
    pub theirs: String,
    pub description: String,
}

/// How a human resolver chose to settle a conflicted merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the session branch's side for every conflict.
    AcceptSession,
    /// Keep the agent branch's side for every conflict.
    AcceptAgent,
    /// Apply caller-supplied file contents.
    ManualMerge,
    /// Drop this agent's work entirely.
    SkipAgent,
    /// Abandon the whole session.
    AbortSession,
}

/// A resolver's decision, with file contents for manual merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResolution {
    pub strategy: ResolutionStrategy,
    /// Required for `ManualMerge`: path → merged content.
    pub selected_files: Option<HashMap<String, String>>,
}
