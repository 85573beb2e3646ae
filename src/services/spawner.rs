//! Agent spawner.
//!
//! Launches one worker per admitted task: registers the agent and its
//! path claims, forwards executor progress to the event stream, and
//! delivers the execution result on a per-spawn channel. Workers never
//! block on event emission.

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{
    Agent, EventKind, ExecutionResult, OrchestratorEvent, SpawnResult, Task,
};
use crate::domain::ports::{AgentRunner, ExecuteOptions, ProgressCallback};
use crate::services::collision::CollisionChecker;
use crate::services::emitter::EventEmitter;
use crate::services::registry::AgentRegistry;
use crate::services::scheduler::Scheduler;

/// Caller-facing options for one spawn.
#[derive(Clone, Default)]
pub struct SpawnOptions {
    pub branch: String,
    pub quality_gates: bool,
    pub self_loop: bool,
    pub baseline: Option<String>,
    pub learnings: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

/// Spawns agents for admitted tasks.
pub struct AgentSpawner {
    runner: Arc<dyn AgentRunner>,
    registry: Arc<AgentRegistry>,
    collision: Arc<CollisionChecker>,
    emitter: Arc<EventEmitter>,
    scheduler: Option<Arc<Scheduler>>,
}

impl AgentSpawner {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        registry: Arc<AgentRegistry>,
        collision: Arc<CollisionChecker>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            runner,
            registry,
            collision,
            emitter,
            scheduler: None,
        }
    }

    /// Wire the scheduler so spawns are counted as running immediately.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Start executing a task on a fresh agent.
    ///
    /// Returns the minted agent ID and a channel that yields exactly one
    /// [`SpawnResult`] when the agent finishes. Executor errors are
    /// folded into a failed result rather than surfaced here.
    pub async fn spawn(
        &self,
        token: CancellationToken,
        task: &Task,
        opts: SpawnOptions,
    ) -> (Uuid, oneshot::Receiver<SpawnResult>) {
        let agent = Agent::new(task.id);
        let agent_id = agent.id;
        self.registry.register(agent).await;

        if let Some(scheduler) = &self.scheduler {
            scheduler.on_agent_start(agent_id, task.clone()).await;
        }

        let prefixes = self.collision.extract_path_prefixes(task);
        self.collision.register_agent(agent_id, prefixes, Vec::new());

        self.emitter.emit(
            OrchestratorEvent::for_task(
                EventKind::TaskStarted,
                task.id,
                task.title.clone(),
                format!("agent {agent_id} started"),
            )
            .with_parent(task.parent_id)
            .with_agent(agent_id),
        );

        let (result_tx, result_rx) = oneshot::channel();
        let runner = self.runner.clone();
        let emitter = self.emitter.clone();
        let task = task.clone();
        let caller_progress = opts.on_progress.clone();

        tokio::spawn(async move {
            let progress_emitter = emitter.clone();
            let progress: ProgressCallback = Arc::new(move |update| {
                progress_emitter.emit(
                    OrchestratorEvent::new(
                        EventKind::AgentProgress,
                        update.current_action.clone(),
                    )
                    .with_agent(update.agent_id)
                    .with_usage(update.tokens_used, update.cost, update.duration)
                    .with_action(update.current_action.clone()),
                );
                if let Some(callback) = &caller_progress {
                    callback(update);
                }
            });

            let exec_opts = ExecuteOptions {
                agent_id: Some(agent_id),
                branch: opts.branch,
                worktree: None,
                quality_gates: opts.quality_gates,
                self_loop: opts.self_loop,
                baseline: opts.baseline,
                learnings: opts.learnings,
                on_progress: Some(progress),
            };

            let result = match runner.execute(token, &task, task.tier, exec_opts).await {
                Ok(mut result) => {
                    result.agent_id.get_or_insert(agent_id);
                    result
                }
                Err(err) => {
                    warn!(task = %task.title, agent = %agent_id, error = %err, "executor error");
                    ExecutionResult::failed(agent_id, err.to_string())
                }
            };

            debug!(task = %task.title, agent = %agent_id, success = result.success, "agent finished");
            let _ = result_tx.send(SpawnResult {
                agent_id,
                task_id: task.id,
                result,
            });
        });

        (agent_id, result_rx)
    }
}
