//! Session branch lifecycle.
//!
//! A session branch isolates one orchestration run's integrated work
//! until it is merged back to main. In greenfield mode every operation is
//! a no-op and the target branch is `main` directly.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::VcsDriver;

/// Branch names that may never serve as a session branch.
const PROTECTED_BRANCHES: &[&str] = &["main", "master", "dev"];

/// Validates a git branch name against `git check-ref-format`-style rules.
///
/// Rejects names that could be interpreted as git flags or otherwise
/// subvert command execution.
pub fn validate_branch_name(name: &str) -> OrchestratorResult<()> {
    let invalid = |reason: &str| {
        Err(OrchestratorError::InvalidBranchName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.starts_with('-') {
        return invalid("must not start with '-'");
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    for ch in name.chars() {
        if ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return invalid("contains a disallowed character");
        }
    }
    if name.ends_with(".lock") {
        return invalid("must not end with '.lock'");
    }
    Ok(())
}

/// Creates, merges back, and cleans up the session branch.
pub struct SessionBranchManager {
    vcs: Arc<dyn VcsDriver>,
    branch: String,
    greenfield: bool,
}

impl SessionBranchManager {
    /// Build a manager for a session. The derived branch name is
    /// validated and must not shadow a protected branch.
    pub fn new(
        vcs: Arc<dyn VcsDriver>,
        branch_prefix: &str,
        session_id: Uuid,
        greenfield: bool,
    ) -> OrchestratorResult<Self> {
        let short = session_id.simple().to_string();
        let branch = format!("{branch_prefix}/{}", &short[..8]);
        validate_branch_name(&branch)?;
        if PROTECTED_BRANCHES.contains(&branch.as_str()) {
            return Err(OrchestratorError::InvalidBranchName {
                name: branch,
                reason: "protected branch may not be a session branch".to_string(),
            });
        }
        Ok(Self {
            vcs,
            branch,
            greenfield,
        })
    }

    /// The branch merges target: the session branch, or `main` in
    /// greenfield mode.
    pub fn target_branch(&self) -> &str {
        if self.greenfield {
            "main"
        } else {
            &self.branch
        }
    }

    pub fn session_branch(&self) -> &str {
        &self.branch
    }

    /// Create (or check out) the session branch. Idempotent.
    pub async fn create_branch(&self) -> OrchestratorResult<()> {
        if self.greenfield {
            return Ok(());
        }
        let exists = self
            .vcs
            .branch_exists(&self.branch)
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        if exists {
            self.vcs
                .checkout_branch(&self.branch)
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        } else {
            self.vcs
                .create_and_checkout_branch(&self.branch)
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        }
        info!(branch = %self.branch, "session branch ready");
        Ok(())
    }

    /// Merge the session branch back to main with a no-fast-forward
    /// merge. Pending working-tree state is auto-committed first;
    /// "nothing to commit" failures are ignored.
    pub async fn merge_to_main(&self) -> OrchestratorResult<()> {
        if self.greenfield {
            return Ok(());
        }

        if let Err(err) = self.commit_pending().await {
            warn!(error = %err, "auto-commit before merge-back failed");
        }

        self.checkout_main().await?;
        self.vcs
            .merge_no_ff(&self.branch, &format!("Merge session {}", self.branch))
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        info!(branch = %self.branch, "session merged to main");
        Ok(())
    }

    /// Check out main and force-delete the session branch.
    pub async fn cleanup(&self) -> OrchestratorResult<()> {
        if self.greenfield {
            return Ok(());
        }
        self.checkout_main().await?;
        self.vcs
            .delete_branch(&self.branch, true)
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        Ok(())
    }

    async fn commit_pending(&self) -> anyhow::Result<()> {
        self.vcs.add_all().await?;
        match self.vcs.commit("Session working-tree state").await {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("nothing to commit") => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Check out `main`, falling back to `master`.
    async fn checkout_main(&self) -> OrchestratorResult<()> {
        if self.vcs.checkout_branch("main").await.is_ok() {
            return Ok(());
        }
        self.vcs
            .checkout_branch("master")
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_option_injection() {
        assert!(validate_branch_name("-Xours").is_err());
        assert!(validate_branch_name("--strategy=recursive").is_err());
        assert!(validate_branch_name("-").is_err());
    }

    #[test]
    fn test_validate_rejects_double_dot_and_controls() {
        assert!(validate_branch_name("main..evil").is_err());
        assert!(validate_branch_name("branch~1").is_err());
        assert!(validate_branch_name("branch name").is_err());
        assert!(validate_branch_name("branch\u{7}bell").is_err());
        assert!(validate_branch_name("").is_err());
    }

    #[test]
    fn test_validate_rejects_lock_suffix() {
        assert!(validate_branch_name("feature.lock").is_err());
    }

    #[test]
    fn test_validate_accepts_ordinary_names() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("session/a1b2c3d4").is_ok());
        assert!(validate_branch_name("agent/task-12345678").is_ok());
        assert!(validate_branch_name("release/1.0.0").is_ok());
    }
}
