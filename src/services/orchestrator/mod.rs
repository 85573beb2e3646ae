//! Orchestrator - wires the scheduling, execution, and merge subsystems
//! into one session run loop.
//!
//! The orchestrator is a thin coordinator over well-defined subsystems:
//!
//! - **run_loop**: decompose → build graph → create session branch →
//!   loop(schedule/spawn/await/merge) → finalize
//! - Collision checker, scheduler, spawner, registry, budget meter,
//!   pause controller, approval manager, merge pipeline, event emitter

mod run_loop;

pub use run_loop::SessionReport;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::domain::ports::{
    AgentRunner, CommandRunner, LearningStore, LlmProcessFactory, MergeResolver, SecondReviewer,
    SessionTracker, StateStore, TaskDecomposer, VcsDriver,
};
use crate::services::approvals::ApprovalManager;
use crate::services::budget::BudgetMeter;
use crate::services::collision::CollisionChecker;
use crate::services::emitter::EventEmitter;
use crate::services::pause::PauseController;
use crate::services::protected::ProtectedAreaDetector;
use crate::services::registry::AgentRegistry;
use crate::services::scheduler::MergeConflictGate;

/// The session orchestrator.
pub struct Orchestrator {
    pub(super) config: OrchestratorConfig,
    pub(super) session_id: Uuid,

    // External collaborators
    pub(super) decomposer: Arc<dyn TaskDecomposer>,
    pub(super) runner: Arc<dyn AgentRunner>,
    pub(super) vcs: Arc<dyn VcsDriver>,
    pub(super) command_runner: Arc<dyn CommandRunner>,
    pub(super) llm_factory: Option<Arc<dyn LlmProcessFactory>>,
    pub(super) resolver: Option<Arc<dyn MergeResolver>>,
    pub(super) reviewer: Option<Arc<dyn SecondReviewer>>,
    pub(super) store: Option<Arc<dyn StateStore>>,
    pub(super) learnings: Option<Arc<dyn LearningStore>>,
    pub(super) tracker: Option<Arc<dyn SessionTracker>>,

    // Integrated services
    pub(super) emitter: Arc<EventEmitter>,
    pub(super) collision: Arc<CollisionChecker>,
    pub(super) registry: Arc<AgentRegistry>,
    pub(super) pause: Arc<PauseController>,
    pub(super) budget: Arc<BudgetMeter>,
    pub(super) gate: Arc<MergeConflictGate>,
    pub(super) approvals: Arc<ApprovalManager>,
    pub(super) protected: Arc<ProtectedAreaDetector>,

    /// Failure streak of lowest-tier agents; cleared on any success.
    pub(super) override_attempts: AtomicU32,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        decomposer: Arc<dyn TaskDecomposer>,
        runner: Arc<dyn AgentRunner>,
        vcs: Arc<dyn VcsDriver>,
        command_runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let emitter = Arc::new(EventEmitter::new(config.session.event_capacity));
        let collision = Arc::new(CollisionChecker::new(config.collision.clone()));
        let budget = Arc::new(BudgetMeter::from_config(&config.budget));
        let protected = Arc::new(ProtectedAreaDetector::new(&config.protected));
        Self {
            config,
            session_id: Uuid::new_v4(),
            decomposer,
            runner,
            vcs,
            command_runner,
            llm_factory: None,
            resolver: None,
            reviewer: None,
            store: None,
            learnings: None,
            tracker: None,
            emitter,
            collision,
            registry: Arc::new(AgentRegistry::new()),
            pause: Arc::new(PauseController::new()),
            budget,
            gate: Arc::new(MergeConflictGate::new()),
            approvals: Arc::new(ApprovalManager::new()),
            protected,
            override_attempts: AtomicU32::new(0),
        }
    }

    // -- Builder methods --

    /// Enable LLM-assisted semantic merging.
    #[must_use]
    pub fn with_semantic_merge(mut self, factory: Arc<dyn LlmProcessFactory>) -> Self {
        self.llm_factory = Some(factory);
        self
    }

    /// Wire a human merge resolver for conflict escalation.
    #[must_use]
    pub fn with_merge_resolver(mut self, resolver: Arc<dyn MergeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Wire the second reviewer consulted before finalizing merges.
    #[must_use]
    pub fn with_second_reviewer(mut self, reviewer: Arc<dyn SecondReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Wire durable task persistence.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wire the learnings provider. Its failures are never fatal.
    #[must_use]
    pub fn with_learning_store(mut self, learnings: Arc<dyn LearningStore>) -> Self {
        self.learnings = Some(learnings);
        self
    }

    /// Wire cross-session outcome tracking. Its failures are never fatal.
    #[must_use]
    pub fn with_session_tracker(mut self, tracker: Arc<dyn SessionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    // -- Service accessors --

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Take the event stream. Yields `Some` exactly once.
    pub fn events(&self) -> Option<tokio::sync::mpsc::Receiver<crate::domain::models::OrchestratorEvent>> {
        self.emitter.take_receiver()
    }

    /// Events dropped under backpressure so far.
    pub fn dropped_events(&self) -> u64 {
        self.emitter.dropped_count()
    }

    pub fn pause_controller(&self) -> &Arc<PauseController> {
        &self.pause
    }

    pub fn budget(&self) -> &Arc<BudgetMeter> {
        &self.budget
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    /// The session-global merge-conflict block.
    pub fn conflict_gate(&self) -> &Arc<MergeConflictGate> {
        &self.gate
    }

    pub fn collision_checker(&self) -> &Arc<CollisionChecker> {
        &self.collision
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn protected_areas(&self) -> &Arc<ProtectedAreaDetector> {
        &self.protected
    }

    /// Consecutive lowest-tier failures since the last success.
    pub fn override_attempts(&self) -> u32 {
        self.override_attempts.load(Ordering::Relaxed)
    }
}
