//! Version-control driver port.
//!
//! Minimum surface the merge pipeline and session-branch manager need.
//! Errors surface verbatim from the underlying implementation.

use async_trait::async_trait;

use crate::domain::models::NativeMergeOutcome;

#[async_trait]
pub trait VcsDriver: Send + Sync {
    /// Common ancestor of two refs.
    async fn merge_base(&self, a: &str, b: &str) -> anyhow::Result<String>;

    /// Unified diff between two refs.
    async fn diff_between(&self, a: &str, b: &str) -> anyhow::Result<String>;

    /// Paths changed between two refs.
    async fn changed_files_between(&self, a: &str, b: &str) -> anyhow::Result<Vec<String>>;

    /// Working-tree status, porcelain format.
    async fn status(&self) -> anyhow::Result<String>;

    /// File contents at a ref.
    async fn show(&self, reference: &str, path: &str) -> anyhow::Result<String>;

    /// Stage everything.
    async fn add_all(&self) -> anyhow::Result<()>;

    /// Commit staged changes.
    async fn commit(&self, message: &str) -> anyhow::Result<()>;

    async fn checkout_branch(&self, name: &str) -> anyhow::Result<()>;

    async fn create_and_checkout_branch(&self, name: &str) -> anyhow::Result<()>;

    async fn branch_exists(&self, name: &str) -> anyhow::Result<bool>;

    async fn delete_branch(&self, name: &str, force: bool) -> anyhow::Result<()>;

    /// No-fast-forward merge of `branch` into the current branch.
    async fn merge_no_ff(&self, branch: &str, message: &str) -> anyhow::Result<()>;

    /// Abort an in-progress merge, restoring the pre-merge tree.
    async fn abort_merge(&self) -> anyhow::Result<()>;

    /// During a conflicted merge, take the current branch's side of a path.
    async fn checkout_ours(&self, path: &str) -> anyhow::Result<()>;

    /// During a conflicted merge, take the incoming branch's side of a path.
    async fn checkout_theirs(&self, path: &str) -> anyhow::Result<()>;

    /// Hard reset to a ref (used for single-commit rollback).
    async fn reset(&self, reference: &str) -> anyhow::Result<()>;

    /// Stage specific paths.
    async fn stage_files(&self, paths: &[String]) -> anyhow::Result<()>;

    /// Attempt a fast-forward/three-way merge of an agent branch into
    /// `target`. On a content conflict the merge is left in progress with
    /// the conflicted index in place and the outcome lists the conflicted
    /// paths with `needs_semantic_merge` set. In greenfield mode the
    /// driver rebases internally when the caller retries.
    async fn merge_branch(&self, branch: &str, target: &str) -> anyhow::Result<NativeMergeOutcome>;
}
