//! Second-reviewer and human merge-resolver ports.

use async_trait::async_trait;

use crate::domain::models::{ConflictPresentation, MergeResolution};
use crate::services::second_review::ReviewReason;

/// Verdict from the external second reviewer.
///
/// Only an explicit non-approval blocks a merge; reviewer failures are
/// treated as approval by the caller.
#[derive(Debug, Clone)]
pub struct ReviewVerdict {
    pub approved: bool,
    pub concerns: Vec<String>,
}

/// Second LLM review of a merge's diff before it is finalized.
#[async_trait]
pub trait SecondReviewer: Send + Sync {
    async fn review(&self, diff: &str, reasons: &[ReviewReason]) -> anyhow::Result<ReviewVerdict>;
}

/// Presents analyzed conflicts to a human and returns their resolution.
///
/// `ManualMerge` resolutions must carry `selected_files`.
#[async_trait]
pub trait MergeResolver: Send + Sync {
    async fn present_conflicts(
        &self,
        presentations: &[ConflictPresentation],
    ) -> anyhow::Result<MergeResolution>;
}
