//! The session run loop.
//!
//! Per iteration: drain completions, schedule a batch, wait if paused,
//! spawn admitted tasks with stagger, and fan completions back in through
//! a single bounded channel. Successful tasks enqueue merge requests;
//! failed tasks block their dependents.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Orchestrator;
use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    AgentTier, DependencyGraph, EventKind, ExecutionResult, GraphError, MergeRequest,
    OrchestratorEvent, Task, TaskKind, TaskStatus,
};
use crate::services::merge::{MergePipeline, ResolverRequest, SemanticMerger};
use crate::services::scheduler::Scheduler;
use crate::services::second_review::SecondReviewTrigger;
use crate::services::session_branch::{validate_branch_name, SessionBranchManager};
use crate::services::spawner::{AgentSpawner, SpawnOptions};

/// Capacity of the completion fan-in channel.
const COMPLETION_CHANNEL_CAPACITY: usize = 256;
/// Capacity of the dedicated-resolver request channel.
const RESOLVER_CHANNEL_CAPACITY: usize = 8;

/// Summary of one finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub tasks_total: usize,
    pub tasks_done: usize,
    pub tasks_failed: usize,
    pub tasks_blocked: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub duration: Duration,
    pub dropped_events: u64,
}

/// What woke an idle loop iteration.
enum Wake {
    Completion(Option<Uuid>),
    Resolver(Option<ResolverRequest>),
    Tick,
}

/// Bookkeeping for one live agent.
struct InFlight {
    task_id: Uuid,
    branch: String,
    token: CancellationToken,
    /// Set when this agent is a dedicated merge resolver; carries the
    /// original request to re-enqueue on success.
    resolver_for: Option<ResolverRequest>,
}

/// Everything one `run` invocation owns.
struct SessionLoop<'a> {
    orchestrator: &'a Orchestrator,
    graph: Arc<RwLock<DependencyGraph>>,
    scheduler: Arc<Scheduler>,
    spawner: AgentSpawner,
    session: SessionBranchManager,
    merge_tx: mpsc::Sender<MergeRequest>,
    completion_tx: mpsc::Sender<Uuid>,
    completion_rx: mpsc::Receiver<Uuid>,
    resolver_rx: mpsc::Receiver<ResolverRequest>,
    inflight: HashMap<Uuid, InFlight>,
    token: CancellationToken,
    total_tokens: u64,
    total_cost: f64,
}

impl Orchestrator {
    /// Run one full session for a change request.
    ///
    /// Decomposes the request, builds the dependency graph, creates the
    /// session branch, drives the scheduling loop to quiescence, drains
    /// the merge queue, and merges the session branch back to main.
    pub async fn run(
        &self,
        token: CancellationToken,
        request: &str,
    ) -> OrchestratorResult<SessionReport> {
        let started = Instant::now();

        let tasks = match self.decompose(request).await {
            Ok(tasks) => tasks,
            Err(err) => return Err(self.fail_session(err)),
        };
        let graph = match DependencyGraph::build(tasks) {
            Ok(graph) => Arc::new(RwLock::new(graph)),
            Err(err) => return Err(self.fail_session(err.into())),
        };

        {
            let graph = graph.read().await;
            let all: Vec<Task> = graph.tasks().cloned().collect();
            let analysis = self.collision.analyze_preflight(&all);
            info!(
                tasks = all.len(),
                overlaps = analysis.overlaps.len(),
                recommended_parallelism = analysis.recommended_parallelism,
                "pre-flight overlap analysis"
            );
        }

        let session = match SessionBranchManager::new(
            self.vcs.clone(),
            &self.config.session.branch_prefix,
            self.session_id,
            self.config.scheduler.greenfield,
        ) {
            Ok(session) => session,
            Err(err) => return Err(self.fail_session(err)),
        };
        if let Err(err) = session.create_branch().await {
            return Err(self.fail_session(err));
        }

        let scheduler = Arc::new(Scheduler::new(
            graph.clone(),
            self.collision.clone(),
            self.gate.clone(),
            &self.config.scheduler,
        ));
        let spawner = AgentSpawner::new(
            self.runner.clone(),
            self.registry.clone(),
            self.collision.clone(),
            self.emitter.clone(),
        )
        .with_scheduler(scheduler.clone());

        let (merge_tx, merge_rx) = mpsc::channel(self.config.merge.queue_capacity);
        let (resolver_tx, resolver_rx) = mpsc::channel(RESOLVER_CHANNEL_CAPACITY);
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);

        let mut pipeline = MergePipeline::new(
            self.vcs.clone(),
            self.command_runner.clone(),
            SecondReviewTrigger::new(self.protected.clone(), self.config.review.clone()),
            self.emitter.clone(),
            self.gate.clone(),
            resolver_tx,
            self.config.merge.clone(),
            session.target_branch().to_string(),
            self.config.scheduler.greenfield,
            std::path::PathBuf::from(&self.config.session.workdir),
        );
        if let Some(factory) = &self.llm_factory {
            pipeline = pipeline.with_semantic_merger(SemanticMerger::new(
                factory.clone(),
                Duration::from_secs(self.config.merge.semantic_timeout_secs),
            ));
        }
        if let Some(resolver) = &self.resolver {
            pipeline = pipeline.with_resolver(resolver.clone());
        }
        if let Some(reviewer) = &self.reviewer {
            pipeline = pipeline.with_reviewer(reviewer.clone());
        }
        let merge_worker = tokio::spawn(Arc::new(pipeline).run(merge_rx));

        let mut session_loop = SessionLoop {
            orchestrator: self,
            graph,
            scheduler,
            spawner,
            session,
            merge_tx,
            completion_tx,
            completion_rx,
            resolver_rx,
            inflight: HashMap::new(),
            token,
            total_tokens: 0,
            total_cost: 0.0,
        };

        let result = session_loop.drive().await;

        // Close the queue and let the worker drain remaining merges.
        let SessionLoop {
            merge_tx,
            mut completion_rx,
            session,
            graph,
            ..
        } = session_loop;
        drop(merge_tx);
        completion_rx.close();
        if let Err(err) = merge_worker.await {
            warn!(error = %err, "merge worker terminated abnormally");
        }

        match result {
            Ok((total_tokens, total_cost)) => {
                if let Err(err) = session.merge_to_main().await {
                    return Err(self.fail_session(err));
                }
                if let Err(err) = session.cleanup().await {
                    warn!(error = %err, "session branch cleanup failed");
                }
                let report = self
                    .build_report(&graph, total_tokens, total_cost, started)
                    .await;
                self.emitter.emit(OrchestratorEvent::new(
                    EventKind::SessionDone,
                    format!(
                        "session {} done: {}/{} tasks",
                        self.session_id, report.tasks_done, report.tasks_total
                    ),
                ));
                Ok(report)
            }
            Err(err) => Err(self.fail_session(err)),
        }
    }

    /// Decompose the request and resolve title references to task IDs.
    async fn decompose(&self, request: &str) -> OrchestratorResult<Vec<Task>> {
        let specs = self
            .decomposer
            .decompose(request)
            .await
            .map_err(|e| OrchestratorError::DecompositionFailed(e.to_string()))?;
        if specs.is_empty() {
            return Err(OrchestratorError::EmptyDecomposition);
        }

        let mut by_title: HashMap<String, Uuid> = HashMap::new();
        let mut tasks: Vec<Task> = Vec::with_capacity(specs.len());
        for spec in &specs {
            let mut task = Task::new(spec.title.clone(), spec.description.clone());
            task.acceptance_criteria = spec.acceptance_criteria.clone();
            task.file_boundaries = spec.file_boundaries.clone();
            task.kind = spec.kind;
            task.tier = spec.tier.unwrap_or(AgentTier::Builder);
            by_title.insert(spec.title.clone(), task.id);
            tasks.push(task);
        }
        for (task, spec) in tasks.iter_mut().zip(&specs) {
            for reference in &spec.depends_on {
                let id = by_title
                    .get(reference)
                    .copied()
                    .or_else(|| reference.parse::<Uuid>().ok().filter(|id| *id != task.id))
                    .ok_or_else(|| GraphError::UnknownDependency {
                        task: spec.title.clone(),
                        dependency: reference.clone(),
                    })?;
                task.depends_on.push(id);
            }
        }
        Ok(tasks)
    }

    /// Emit the session-failed event and pass the error through.
    fn fail_session(&self, err: OrchestratorError) -> OrchestratorError {
        self.emitter.emit(
            OrchestratorEvent::new(
                EventKind::SessionFailed,
                format!("session {} failed", self.session_id),
            )
            .with_error(err.to_string()),
        );
        err
    }

    async fn build_report(
        &self,
        graph: &Arc<RwLock<DependencyGraph>>,
        total_tokens: u64,
        total_cost: f64,
        started: Instant,
    ) -> SessionReport {
        let graph = graph.read().await;
        let mut report = SessionReport {
            session_id: self.session_id,
            tasks_total: graph.len(),
            tasks_done: 0,
            tasks_failed: 0,
            tasks_blocked: 0,
            total_tokens,
            total_cost,
            duration: started.elapsed(),
            dropped_events: self.emitter.dropped_count(),
        };
        for task in graph.tasks() {
            match task.status {
                TaskStatus::Done => report.tasks_done += 1,
                TaskStatus::Failed => report.tasks_failed += 1,
                TaskStatus::Blocked => report.tasks_blocked += 1,
                TaskStatus::Pending | TaskStatus::InProgress => {}
            }
        }
        report
    }
}

impl SessionLoop<'_> {
    /// Drive the loop until the graph is quiescent or the session dies.
    /// Returns the accumulated (tokens, cost) on success.
    async fn drive(&mut self) -> OrchestratorResult<(u64, f64)> {
        loop {
            if self.token.is_cancelled() {
                self.cancel_inflight();
                return Err(OrchestratorError::Canceled);
            }

            // Drain completion and resolver notifications.
            while let Ok(agent_id) = self.completion_rx.try_recv() {
                self.handle_completion(agent_id).await;
            }
            while let Ok(request) = self.resolver_rx.try_recv() {
                self.spawn_dedicated_resolver(request).await;
            }

            let batch = if self.orchestrator.budget.can_start_new() {
                self.scheduler.schedule().await
            } else {
                debug!("budget exhausted; no new spawns");
                Vec::new()
            };

            if batch.is_empty() {
                if self.inflight.is_empty() {
                    return Ok((self.total_tokens, self.total_cost));
                }
                let poll = Duration::from_millis(self.orchestrator.config.scheduler.poll_interval_ms);
                let wake = {
                    let token = &self.token;
                    let completion_rx = &mut self.completion_rx;
                    let resolver_rx = &mut self.resolver_rx;
                    tokio::select! {
                        () = token.cancelled() => Wake::Tick,
                        received = completion_rx.recv() => Wake::Completion(received),
                        received = resolver_rx.recv() => Wake::Resolver(received),
                        () = tokio::time::sleep(poll) => Wake::Tick,
                    }
                };
                match wake {
                    Wake::Completion(Some(agent_id)) => self.handle_completion(agent_id).await,
                    Wake::Resolver(Some(request)) => {
                        self.spawn_dedicated_resolver(request).await;
                    }
                    Wake::Completion(None) | Wake::Resolver(None) | Wake::Tick => {}
                }
                continue;
            }

            if let Err(err) = self.orchestrator.pause.wait_if_paused(&self.token).await {
                self.cancel_inflight();
                return Err(err);
            }

            let stagger =
                Duration::from_millis(self.orchestrator.config.scheduler.spawn_stagger_ms);
            let batch_len = batch.len();
            for (index, task) in batch.into_iter().enumerate() {
                self.spawn_task(task).await;
                if index + 1 < batch_len {
                    tokio::select! {
                        () = self.token.cancelled() => break,
                        () = tokio::time::sleep(stagger) => {}
                    }
                }
            }
        }
    }

    /// Queue, mark, persist, and spawn one admitted task.
    async fn spawn_task(&mut self, task: Task) {
        let orchestrator = self.orchestrator;
        orchestrator.emitter.emit(
            OrchestratorEvent::for_task(
                EventKind::TaskQueued,
                task.id,
                task.title.clone(),
                "queued for execution",
            )
            .with_parent(task.parent_id),
        );

        let task = {
            let mut graph = self.graph.write().await;
            graph.set_status(task.id, TaskStatus::InProgress, None);
            if let Some(entry) = graph.get_mut(task.id) {
                entry.execution_count += 1;
            }
            graph.get(task.id).cloned().unwrap_or(task)
        };
        self.persist(&task).await;

        let learnings = match &orchestrator.learnings {
            Some(store) => match store.lookup(&task).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(task = %task.title, error = %err, "learnings lookup failed");
                    None
                }
            },
            None => None,
        };

        let short = task.id.simple().to_string();
        let branch = format!(
            "{}/{}",
            orchestrator.config.session.agent_branch_prefix,
            &short[..8]
        );
        if let Err(err) = validate_branch_name(&branch) {
            warn!(branch = %branch, error = %err, "derived agent branch name invalid");
        }

        let child = self.token.child_token();
        let (agent_id, result_rx) = self
            .spawner
            .spawn(
                child.clone(),
                &task,
                SpawnOptions {
                    branch: branch.clone(),
                    quality_gates: true,
                    self_loop: task.tier != AgentTier::Quick,
                    baseline: None,
                    learnings,
                    on_progress: None,
                },
            )
            .await;

        {
            let mut graph = self.graph.write().await;
            if let Some(entry) = graph.get_mut(task.id) {
                entry.assigned_to = Some(agent_id);
            }
        }

        self.inflight.insert(
            agent_id,
            InFlight {
                task_id: task.id,
                branch,
                token: child,
                resolver_for: None,
            },
        );

        // Fan the result into the single completion channel.
        let registry = orchestrator.registry.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            if let Ok(spawned) = result_rx.await {
                registry.store_result(spawned.agent_id, spawned.result).await;
            }
            let _ = completion_tx.send(agent_id).await;
        });
    }

    /// Handle one agent completion notification.
    async fn handle_completion(&mut self, agent_id: Uuid) {
        let Some(entry) = self.inflight.remove(&agent_id) else {
            warn!(agent = %agent_id, "completion for unknown agent");
            return;
        };
        let orchestrator = self.orchestrator;

        let result = orchestrator
            .registry
            .result(agent_id)
            .await
            .unwrap_or_else(|| ExecutionResult::failed(agent_id, "result missing from registry"));

        orchestrator.collision.unregister_agent(agent_id);
        orchestrator.registry.unregister(agent_id).await;
        if let Some(store) = &orchestrator.store {
            if let Err(err) = store.save_result(entry.task_id, &result).await {
                warn!(agent = %agent_id, error = %err, "result persistence failed");
            }
        }
        let blocked = self
            .scheduler
            .on_agent_complete(agent_id, result.success)
            .await;

        self.total_tokens += result.tokens_used;
        self.total_cost += result.cost;
        orchestrator.budget.update(result.cost);
        if !orchestrator.budget.can_start_new() && !orchestrator.budget.is_exhausted() {
            orchestrator.budget.on_exhausted();
            warn!("session budget exhausted; new spawns gated");
        }

        if let Some(request) = entry.resolver_for {
            self.finish_dedicated_resolver(&result, request).await;
            return;
        }

        let task = self.graph.read().await.get(entry.task_id).cloned();
        let Some(mut task) = task else {
            warn!(task_id = %entry.task_id, "completed task missing from graph");
            return;
        };

        if result.success {
            {
                let mut graph = self.graph.write().await;
                graph.set_status(task.id, TaskStatus::Done, None);
                if let Some(record) = graph.get_mut(task.id) {
                    record.completed_at = Some(Utc::now());
                }
                task = graph.get(task.id).cloned().unwrap_or(task);
            }
            self.persist(&task).await;
            orchestrator.override_attempts.store(0, Ordering::Relaxed);

            if let Some(store) = &orchestrator.learnings {
                if let Err(err) = store.capture(&task, &result).await {
                    warn!(task = %task.title, error = %err, "learning capture failed");
                }
            }
            self.record_outcome(&task, true).await;

            orchestrator.emitter.emit(
                OrchestratorEvent::for_task(
                    EventKind::TaskCompleted,
                    task.id,
                    task.title.clone(),
                    "task completed",
                )
                .with_agent(agent_id)
                .with_usage(result.tokens_used, result.cost, result.duration),
            );

            let request = MergeRequest {
                task_id: task.id,
                agent_id,
                branch: entry.branch,
                token: self.token.child_token(),
            };
            if self.merge_tx.send(request).await.is_err() {
                warn!(task = %task.title, "merge queue closed; agent work not integrated");
            }
        } else {
            if task.tier.needs_override_gate() {
                orchestrator.override_attempts.fetch_add(1, Ordering::Relaxed);
            }
            {
                let mut graph = self.graph.write().await;
                graph.set_status(task.id, TaskStatus::Failed, None);
                task = graph.get(task.id).cloned().unwrap_or(task);
            }
            self.persist(&task).await;
            self.record_outcome(&task, false).await;

            orchestrator.emitter.emit(
                OrchestratorEvent::for_task(
                    EventKind::TaskFailed,
                    task.id,
                    task.title.clone(),
                    "task failed",
                )
                .with_agent(agent_id)
                .with_error(result.error.clone().unwrap_or_default()),
            );

            for blocked_id in blocked {
                let blocked_task = self.graph.read().await.get(blocked_id).cloned();
                if let Some(blocked_task) = blocked_task {
                    self.persist(&blocked_task).await;
                    orchestrator.emitter.emit(OrchestratorEvent::for_task(
                        EventKind::TaskBlocked,
                        blocked_task.id,
                        blocked_task.title.clone(),
                        blocked_task.blocked_reason.clone().unwrap_or_default(),
                    ));
                }
            }
        }
    }

    /// Launch an Architect-tier agent dedicated to resolving a blocked
    /// merge. Not part of the graph; tracked in-flight like any agent.
    async fn spawn_dedicated_resolver(&mut self, request: ResolverRequest) {
        info!(
            branch = %request.branch,
            files = request.conflict_files.len(),
            "spawning dedicated merge resolver"
        );
        let description = format!(
            "Resolve the merge conflict between branch {} and the session branch. \
             Conflicted files: {}",
            request.branch,
            request.conflict_files.join(", ")
        );
        let task = Task::new("Resolve merge conflicts", description)
            .with_tier(AgentTier::Architect)
            .with_kind(TaskKind::Normal);

        let child = self.token.child_token();
        let (agent_id, result_rx) = self
            .spawner
            .spawn(
                child.clone(),
                &task,
                SpawnOptions {
                    branch: request.branch.clone(),
                    quality_gates: true,
                    ..SpawnOptions::default()
                },
            )
            .await;

        self.inflight.insert(
            agent_id,
            InFlight {
                task_id: task.id,
                branch: request.branch.clone(),
                token: child,
                resolver_for: Some(request),
            },
        );

        let registry = self.orchestrator.registry.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            if let Ok(spawned) = result_rx.await {
                registry.store_result(spawned.agent_id, spawned.result).await;
            }
            let _ = completion_tx.send(agent_id).await;
        });
    }

    /// A dedicated resolver finished: clear the block and retry the merge
    /// on success, leave the block standing otherwise.
    async fn finish_dedicated_resolver(
        &mut self,
        result: &ExecutionResult,
        request: ResolverRequest,
    ) {
        if result.success {
            self.orchestrator.gate.clear_merge_conflict();
            let retry = MergeRequest {
                task_id: request.task_id,
                agent_id: result.agent_id.unwrap_or_else(Uuid::new_v4),
                branch: request.branch,
                token: self.token.child_token(),
            };
            if self.merge_tx.send(retry).await.is_err() {
                warn!("merge queue closed; resolved conflict not re-merged");
            }
        } else {
            warn!(
                branch = %request.branch,
                "dedicated resolver failed; merge conflict block stands"
            );
        }
    }

    async fn record_outcome(&self, task: &Task, success: bool) {
        if let Some(tracker) = &self.orchestrator.tracker {
            if let Err(err) = tracker
                .record_outcome(self.orchestrator.session_id, task, success)
                .await
            {
                warn!(task = %task.title, error = %err, "cross-session tracking failed");
            }
        }
    }

    /// Persist one task record; failures are warnings, not fatal.
    async fn persist(&self, task: &Task) {
        if let Some(store) = &self.orchestrator.store {
            if let Err(err) = store.save_task(task).await {
                warn!(task = %task.title, error = %err, "task persistence failed");
            }
        }
    }

    fn cancel_inflight(&mut self) {
        for entry in self.inflight.values() {
            entry.token.cancel();
        }
    }
}
