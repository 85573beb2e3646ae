//! Snapshot-bound approvals.
//!
//! An approval is pinned to a `(base commit, diff hash)` pair; any change
//! to either expires it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Who granted an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovedBy {
    User,
    Auto,
}

/// A recorded approval for one task's diff snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub task_id: Uuid,
    pub base_commit: String,
    /// SHA-256 of the literal diff text, hex-encoded.
    pub diff_hash: String,
    pub approved_at: DateTime<Utc>,
    pub approved_by: ApprovedBy,
}

impl Approval {
    /// Record an approval for the given snapshot.
    pub fn new(task_id: Uuid, base_commit: impl Into<String>, diff: &str, by: ApprovedBy) -> Self {
        Self {
            task_id,
            base_commit: base_commit.into(),
            diff_hash: diff_hash(diff),
            approved_at: Utc::now(),
            approved_by: by,
        }
    }

    /// Whether this approval still covers the given snapshot.
    pub fn covers(&self, base_commit: &str, diff: &str) -> bool {
        self.base_commit == base_commit && self.diff_hash == diff_hash(diff)
    }
}

/// Hex-encoded SHA-256 of the literal diff text.
pub fn diff_hash(diff: &str) -> String {
    hex::encode(Sha256::digest(diff.as_bytes()))
}

/// Request put on the approval bus for a human (or policy) to answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub diff: String,
    pub description: String,
    pub base_commit: String,
}

/// Answer to an approval request. Responses for unknown tasks are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub task_id: Uuid,
    pub approved: bool,
    pub reason: Option<String>,
}
