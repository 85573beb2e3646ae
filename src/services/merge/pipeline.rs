//! Serialized merge pipeline.
//!
//! A single worker consumes merge requests in FIFO order, so at most one
//! merge mutates the working tree at a time and post-merge verification
//! is meaningful. Per request: native git merge, then semantic merge with
//! bounded exponential retry, then structural smart-merge of config
//! files, then escalation — gated by second review and build
//! verification with single-commit rollback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MergeConfig;
use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    ConflictFile, ConflictPresentation, EventKind, MergeOutcome, MergeRequest, NativeMergeOutcome,
    OrchestratorEvent, ResolutionStrategy,
};
use crate::domain::ports::{CommandRunner, MergeResolver, SecondReviewer, VcsDriver};
use crate::services::collision::is_critical_file;
use crate::services::emitter::EventEmitter;
use crate::services::merge::semantic::{SemanticMergeOutcome, SemanticMerger};
use crate::services::merge::smart::SmartMerger;
use crate::services::scheduler::MergeConflictGate;
use crate::services::second_review::{is_source_file, SecondReviewTrigger};

/// Request to spawn a dedicated merge-resolver agent.
#[derive(Debug, Clone)]
pub struct ResolverRequest {
    pub task_id: Uuid,
    pub branch: String,
    pub conflict_files: Vec<String>,
}

/// Serialized FIFO merge worker.
pub struct MergePipeline {
    vcs: Arc<dyn VcsDriver>,
    runner: Arc<dyn CommandRunner>,
    semantic: Option<SemanticMerger>,
    smart: SmartMerger,
    resolver: Option<Arc<dyn MergeResolver>>,
    reviewer: Option<Arc<dyn SecondReviewer>>,
    review_trigger: SecondReviewTrigger,
    emitter: Arc<EventEmitter>,
    gate: Arc<MergeConflictGate>,
    resolver_tx: mpsc::Sender<ResolverRequest>,
    config: MergeConfig,
    target_branch: String,
    greenfield: bool,
    repo_dir: PathBuf,
}

impl MergePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vcs: Arc<dyn VcsDriver>,
        runner: Arc<dyn CommandRunner>,
        review_trigger: SecondReviewTrigger,
        emitter: Arc<EventEmitter>,
        gate: Arc<MergeConflictGate>,
        resolver_tx: mpsc::Sender<ResolverRequest>,
        config: MergeConfig,
        target_branch: String,
        greenfield: bool,
        repo_dir: PathBuf,
    ) -> Self {
        Self {
            vcs,
            runner,
            semantic: None,
            smart: SmartMerger::new(),
            resolver: None,
            reviewer: None,
            review_trigger,
            emitter,
            gate,
            resolver_tx,
            config,
            target_branch,
            greenfield,
            repo_dir,
        }
    }

    /// Enable LLM-assisted conflict resolution.
    #[must_use]
    pub fn with_semantic_merger(mut self, semantic: SemanticMerger) -> Self {
        self.semantic = Some(semantic);
        self
    }

    /// Wire a human merge resolver for escalation.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn MergeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Wire the second reviewer.
    #[must_use]
    pub fn with_reviewer(mut self, reviewer: Arc<dyn SecondReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Consume requests until the channel closes. Strictly one at a time,
    /// FIFO.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<MergeRequest>) {
        while let Some(request) = rx.recv().await {
            self.process(request).await;
        }
        debug!("merge pipeline drained");
    }

    /// Process one merge request, emitting start/completion events.
    pub async fn process(&self, request: MergeRequest) -> MergeOutcome {
        self.emitter.emit(
            OrchestratorEvent::new(
                EventKind::MergeStarted,
                format!("merging {} into {}", request.branch, self.target_branch),
            )
            .with_agent(request.agent_id),
        );

        let outcome = match self.process_inner(&request).await {
            Ok(outcome) => outcome,
            Err(OrchestratorError::Canceled) => {
                MergeOutcome::failed("merge canceled", Vec::new())
            }
            Err(err) => MergeOutcome::failed("merge error", Vec::new()).with_error(err.to_string()),
        };

        let mut event = OrchestratorEvent::new(
            EventKind::MergeCompleted,
            format!(
                "merge of {} {}: {}",
                request.branch,
                if outcome.success { "succeeded" } else { "failed" },
                outcome.reason
            ),
        )
        .with_agent(request.agent_id);
        if let Some(error) = &outcome.error {
            event = event.with_error(error.clone());
        }
        self.emitter.emit(event);
        outcome
    }

    async fn process_inner(&self, request: &MergeRequest) -> OrchestratorResult<MergeOutcome> {
        if request.token.is_cancelled() {
            return Err(OrchestratorError::Canceled);
        }

        // Step 1: native fast-forward/three-way merge, retried in
        // greenfield mode where the driver rebases between attempts.
        let attempts = if self.greenfield {
            self.config.greenfield_merge_attempts.max(1)
        } else {
            1
        };
        let mut native = NativeMergeOutcome::default();
        for attempt in 1..=attempts {
            native = self
                .vcs
                .merge_branch(&request.branch, &self.target_branch)
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
            if native.success {
                break;
            }
            debug!(
                branch = %request.branch,
                attempt,
                conflicts = native.conflict_files.len(),
                "native merge attempt failed"
            );
        }

        // Step 2: clean merge; gate on second review, then finalize.
        if native.success {
            return self.finalize_clean_merge(request, &native).await;
        }

        // Step 3: no semantic merger configured.
        if self.semantic.is_none() || !native.needs_semantic_merge {
            let _ = self.vcs.abort_merge().await;
            return Ok(MergeOutcome::failed(
                "native merge conflict and no semantic merge available",
                native.conflict_files,
            ));
        }

        // Step 4/5: fallback resolution.
        self.resolve_conflicts(request, &native.conflict_files).await
    }

    /// Second review and branch deletion for a conflict-free merge.
    async fn finalize_clean_merge(
        &self,
        request: &MergeRequest,
        native: &NativeMergeOutcome,
    ) -> OrchestratorResult<MergeOutcome> {
        let diff = match &native.diff {
            Some(diff) => diff.clone(),
            None => self
                .vcs
                .diff_between("HEAD~1", "HEAD")
                .await
                .unwrap_or_default(),
        };
        let changed = if native.changed_files.is_empty() {
            self.vcs
                .changed_files_between("HEAD~1", "HEAD")
                .await
                .unwrap_or_default()
        } else {
            native.changed_files.clone()
        };

        if let Some(rejection) = self.second_review(request, &diff, &changed).await {
            self.vcs
                .reset("HEAD~1")
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
            return Ok(rejection);
        }

        self.vcs
            .delete_branch(&request.branch, true)
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        info!(branch = %request.branch, "native merge completed");
        Ok(MergeOutcome::succeeded("native merge"))
    }

    /// Evaluate the second-review rules and consult the reviewer.
    ///
    /// `Some(outcome)` means the merge is rejected and must be rolled
    /// back by the caller. Reviewer failures never block a merge.
    async fn second_review(
        &self,
        request: &MergeRequest,
        diff: &str,
        changed_files: &[String],
    ) -> Option<MergeOutcome> {
        let reviewer = self.reviewer.as_ref()?;
        let reasons = self.review_trigger.evaluate(diff, changed_files);
        if reasons.is_empty() {
            return None;
        }

        self.emitter.emit(
            OrchestratorEvent::new(
                EventKind::SecondReviewStarted,
                format!("{} trigger(s) for {}", reasons.len(), request.branch),
            )
            .with_agent(request.agent_id),
        );

        let verdict = match reviewer.review(diff, &reasons).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(error = %err, "second reviewer failed; merge passes");
                self.emitter.emit(OrchestratorEvent::new(
                    EventKind::SecondReviewCompleted,
                    "reviewer unavailable, merge passes",
                ));
                return None;
            }
        };

        self.emitter.emit(OrchestratorEvent::new(
            EventKind::SecondReviewCompleted,
            if verdict.approved {
                "approved".to_string()
            } else {
                format!("not approved: {}", verdict.concerns.join("; "))
            },
        ));

        if verdict.approved {
            None
        } else {
            Some(MergeOutcome::failed(
                format!("second review rejected: {}", verdict.concerns.join("; ")),
                Vec::new(),
            ))
        }
    }

    /// Steps 4 and 5: structural merge of criticals, semantic merge with
    /// bounded retry, ours-resolution of leftover non-code files, then
    /// commit, review, and verification.
    async fn resolve_conflicts(
        &self,
        request: &MergeRequest,
        conflict_paths: &[String],
    ) -> OrchestratorResult<MergeOutcome> {
        let conflicts = self.collect_conflicts(request, conflict_paths).await;
        let (critical, mut other): (Vec<ConflictFile>, Vec<ConflictFile>) = conflicts
            .into_iter()
            .partition(|c| is_critical_file(&c.path));

        // Structural pass over the critical config files.
        let mut resolved_paths: Vec<String> = Vec::new();
        let mut structural_count = 0usize;
        if !critical.is_empty() {
            let report = self.smart.resolve(&critical);
            for (path, content) in &report.merged {
                let full = self.repo_dir.join(path);
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| OrchestratorError::MergeFailed(e.to_string()))?;
                }
                tokio::fs::write(&full, content)
                    .await
                    .map_err(|e| OrchestratorError::MergeFailed(e.to_string()))?;
                resolved_paths.push(path.clone());
            }
            structural_count = report.merged.len();
            if !resolved_paths.is_empty() {
                self.vcs
                    .stage_files(&resolved_paths)
                    .await
                    .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
            }
            // Unresolvable criticals rejoin the general pool.
            for path in report.unresolved {
                if let Some(conflict) = critical.iter().find(|c| c.path == path) {
                    other.push(conflict.clone());
                }
            }
        }

        // Semantic pass with bounded exponential retry.
        let mut semantic_files: Vec<String> = Vec::new();
        if !other.is_empty() {
            match self.semantic_with_retry(request, &other).await? {
                SemanticAttempts::Applied(files) => {
                    if !files.is_empty() {
                        self.vcs
                            .stage_files(&files)
                            .await
                            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
                    }
                    semantic_files = files;
                }
                SemanticAttempts::Escalate => {
                    return self.escalate(request, &other).await;
                }
            }
        }

        // Whatever neither pass covered: code conflicts fail the merge,
        // non-code conflicts take the session side.
        let mut ours_files: Vec<String> = Vec::new();
        let mut unresolved_code: Vec<String> = Vec::new();
        for conflict in &other {
            let covered = semantic_files.contains(&conflict.path)
                || resolved_paths.contains(&conflict.path);
            if covered {
                continue;
            }
            if is_source_file(&conflict.path) {
                unresolved_code.push(conflict.path.clone());
            } else {
                self.vcs
                    .checkout_ours(&conflict.path)
                    .await
                    .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
                ours_files.push(conflict.path.clone());
            }
        }
        if !unresolved_code.is_empty() {
            let _ = self.vcs.abort_merge().await;
            return Ok(MergeOutcome::failed(
                "code conflicts remain after semantic merge",
                unresolved_code,
            ));
        }
        if !ours_files.is_empty() {
            self.vcs
                .stage_files(&ours_files)
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        }

        let message = format!(
            "Merge {} into {}: {} structural, {} semantic, {} session-side",
            request.branch,
            self.target_branch,
            structural_count,
            semantic_files.len(),
            ours_files.len(),
        );
        self.vcs
            .commit(&message)
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;

        self.finalize_fallback_merge(request).await
    }

    /// Review, verify, and clean up after a fallback merge commit.
    async fn finalize_fallback_merge(
        &self,
        request: &MergeRequest,
    ) -> OrchestratorResult<MergeOutcome> {
        let diff = self
            .vcs
            .diff_between("HEAD~1", "HEAD")
            .await
            .unwrap_or_default();
        let changed = self
            .vcs
            .changed_files_between("HEAD~1", "HEAD")
            .await
            .unwrap_or_default();

        if let Some(rejection) = self.second_review(request, &diff, &changed).await {
            self.vcs
                .reset("HEAD~1")
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
            return Ok(rejection.via_fallback());
        }

        if let Err(failure) = self.verify_build().await {
            warn!(error = %failure, "post-merge verification failed, rolling back");
            self.vcs
                .reset("HEAD~1")
                .await
                .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
            return Ok(MergeOutcome::failed("build verification failed", Vec::new())
                .with_error(failure.to_string())
                .via_fallback());
        }

        self.vcs
            .delete_branch(&request.branch, true)
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        info!(branch = %request.branch, "fallback merge completed");
        Ok(MergeOutcome::succeeded("fallback merge").via_fallback())
    }

    /// Run the configured build command; `Ok` when disabled.
    async fn verify_build(&self) -> anyhow::Result<()> {
        let Some((program, args)) = self.config.verify_command.split_first() else {
            return Ok(());
        };
        let timeout = Duration::from_secs(self.config.verify_timeout_secs);
        let run = self.runner.run(&self.repo_dir, program, args);
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(_output)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => anyhow::bail!("verification timed out after {timeout:?}"),
        }
    }

    /// Bounded-retry semantic merge. Attempt `n` sleeps
    /// `base * 2^(n-1)` first; a fresh LLM process backs every attempt
    /// and is killed when it ends.
    async fn semantic_with_retry(
        &self,
        request: &MergeRequest,
        conflicts: &[ConflictFile],
    ) -> OrchestratorResult<SemanticAttempts> {
        let semantic = self.semantic.as_ref().expect("semantic merger configured");
        for attempt in 1..=self.config.max_retries {
            let backoff =
                Duration::from_secs(self.config.backoff_base_secs << (attempt - 1));
            tokio::select! {
                () = request.token.cancelled() => return Err(OrchestratorError::Canceled),
                () = tokio::time::sleep(backoff) => {}
            }

            match semantic.merge(&request.token, &self.repo_dir, conflicts).await {
                Ok(SemanticMergeOutcome::Applied { files, reasoning }) => {
                    debug!(attempt, reasoning = %reasoning, "semantic merge succeeded");
                    return Ok(SemanticAttempts::Applied(files));
                }
                Ok(SemanticMergeOutcome::NeedsHuman) => {
                    info!(attempt, "semantic merge needs human judgment");
                    return Ok(SemanticAttempts::Escalate);
                }
                Err(OrchestratorError::Canceled) => return Err(OrchestratorError::Canceled),
                Err(err) => {
                    warn!(attempt, error = %err, "semantic merge attempt failed");
                }
            }
        }
        Ok(SemanticAttempts::Escalate)
    }

    /// Step 5: human resolver when configured, otherwise block the
    /// scheduler and hand off to a dedicated resolver agent.
    async fn escalate(
        &self,
        request: &MergeRequest,
        conflicts: &[ConflictFile],
    ) -> OrchestratorResult<MergeOutcome> {
        let paths: Vec<String> = conflicts.iter().map(|c| c.path.clone()).collect();

        let Some(resolver) = self.resolver.as_ref() else {
            let _ = self.vcs.abort_merge().await;
            self.gate
                .set_merge_conflict(request.task_id, paths.clone());
            if self
                .resolver_tx
                .send(ResolverRequest {
                    task_id: request.task_id,
                    branch: request.branch.clone(),
                    conflict_files: paths.clone(),
                })
                .await
                .is_err()
            {
                warn!("resolver channel closed; conflict block left in place");
            }
            return Ok(MergeOutcome::failed("spawning dedicated resolver", paths));
        };

        let presentations: Vec<ConflictPresentation> = conflicts
            .iter()
            .map(|c| ConflictPresentation {
                task_id: request.task_id,
                branch: request.branch.clone(),
                path: c.path.clone(),
                ours: c.ours.clone(),
                theirs: c.theirs.clone(),
                description: format!("conflict between session and {}", request.branch),
            })
            .collect();

        let resolution = match resolver.present_conflicts(&presentations).await {
            Ok(resolution) => resolution,
            Err(err) => {
                let _ = self.vcs.abort_merge().await;
                return Ok(MergeOutcome::failed("resolver failed", paths)
                    .with_error(err.to_string()));
            }
        };

        match resolution.strategy {
            ResolutionStrategy::AcceptSession => {
                for path in &paths {
                    self.vcs
                        .checkout_ours(path)
                        .await
                        .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
                }
                self.commit_resolution(request, &paths, "accepted session side")
                    .await
            }
            ResolutionStrategy::AcceptAgent => {
                for path in &paths {
                    self.vcs
                        .checkout_theirs(path)
                        .await
                        .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
                }
                self.commit_resolution(request, &paths, "accepted agent side")
                    .await
            }
            ResolutionStrategy::ManualMerge => {
                let Some(files) = resolution.selected_files else {
                    let _ = self.vcs.abort_merge().await;
                    return Ok(MergeOutcome::failed(
                        "manual merge without selected files",
                        paths,
                    ));
                };
                let mut written: Vec<String> = Vec::new();
                for (path, content) in &files {
                    let full = self.repo_dir.join(path);
                    if let Some(parent) = full.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| OrchestratorError::MergeFailed(e.to_string()))?;
                    }
                    tokio::fs::write(&full, content)
                        .await
                        .map_err(|e| OrchestratorError::MergeFailed(e.to_string()))?;
                    written.push(path.clone());
                }
                self.commit_resolution(request, &written, "manual resolution")
                    .await
            }
            ResolutionStrategy::SkipAgent => {
                let _ = self.vcs.abort_merge().await;
                self.vcs
                    .delete_branch(&request.branch, true)
                    .await
                    .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
                Ok(MergeOutcome::failed("agent work skipped by resolver", paths))
            }
            ResolutionStrategy::AbortSession => {
                let _ = self.vcs.abort_merge().await;
                Ok(MergeOutcome::failed("session aborted by resolver", paths))
            }
        }
    }

    async fn commit_resolution(
        &self,
        request: &MergeRequest,
        files: &[String],
        how: &str,
    ) -> OrchestratorResult<MergeOutcome> {
        self.vcs
            .stage_files(files)
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        self.vcs
            .commit(&format!(
                "Merge {} into {}: {how}",
                request.branch, self.target_branch
            ))
            .await
            .map_err(|e| OrchestratorError::Vcs(e.to_string()))?;
        self.finalize_fallback_merge(request).await
    }

    /// Assemble both sides of each conflicted path.
    async fn collect_conflicts(
        &self,
        request: &MergeRequest,
        paths: &[String],
    ) -> Vec<ConflictFile> {
        let mut conflicts = Vec::with_capacity(paths.len());
        let base = self
            .vcs
            .merge_base(&self.target_branch, &request.branch)
            .await
            .ok();
        for path in paths {
            let ours = self
                .vcs
                .show(&self.target_branch, path)
                .await
                .unwrap_or_default();
            let theirs = self.vcs.show(&request.branch, path).await.unwrap_or_default();
            let base_content = match &base {
                Some(base_ref) => self.vcs.show(base_ref, path).await.ok(),
                None => None,
            };
            conflicts.push(ConflictFile {
                path: path.clone(),
                ours,
                theirs,
                base: base_content,
            });
        }
        conflicts
    }
}

enum SemanticAttempts {
    Applied(Vec<String>),
    Escalate,
}
