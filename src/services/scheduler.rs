//! Per-tick batch scheduler.
//!
//! Selects which ready tasks may start this tick under capacity, setup
//! serialization, critical-file exclusivity, greenfield root-touching,
//! and general collision constraints, then orders the batch by milestone
//! number parsed from task titles.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::domain::models::{DependencyGraph, Task, TaskStatus};
use crate::services::collision::CollisionChecker;

/// Milestone tag parsed from titles: `\bM(\d+)\b`, absent sorts last.
fn milestone_of(title: &str) -> u64 {
    static MILESTONE_RE: OnceLock<Regex> = OnceLock::new();
    let re = MILESTONE_RE.get_or_init(|| Regex::new(r"\bM(\d+)\b").expect("valid milestone regex"));
    re.captures(title)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u64::MAX)
}

/// Session-global merge-conflict block.
///
/// While set, the scheduler admits nothing; resolution clears it. This is
/// deliberately a predicate checked at the top of scheduling rather than
/// graph state, because blocked-ness is session-global, not task-local.
#[derive(Debug, Default)]
pub struct MergeConflictGate {
    inner: StdRwLock<Option<ConflictBlock>>,
}

/// The conflict currently blocking scheduling.
#[derive(Debug, Clone)]
pub struct ConflictBlock {
    pub task_id: Uuid,
    pub files: Vec<String>,
}

impl MergeConflictGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an active merge conflict; scheduling stops until cleared.
    pub fn set_merge_conflict(&self, task_id: Uuid, files: Vec<String>) {
        *self.inner.write().expect("conflict gate lock poisoned") =
            Some(ConflictBlock { task_id, files });
    }

    /// Clear the block, resuming scheduling.
    pub fn clear_merge_conflict(&self) {
        *self.inner.write().expect("conflict gate lock poisoned") = None;
    }

    pub fn is_blocked(&self) -> bool {
        self.inner
            .read()
            .expect("conflict gate lock poisoned")
            .is_some()
    }

    pub fn current(&self) -> Option<ConflictBlock> {
        self.inner
            .read()
            .expect("conflict gate lock poisoned")
            .clone()
    }
}

/// A running agent tracked by the scheduler.
#[derive(Debug, Clone)]
struct RunningAgent {
    task: Task,
}

/// Batch scheduler over the dependency graph.
pub struct Scheduler {
    graph: Arc<RwLock<DependencyGraph>>,
    collision: Arc<CollisionChecker>,
    gate: Arc<MergeConflictGate>,
    running: RwLock<HashMap<Uuid, RunningAgent>>,
    max_agents: usize,
    greenfield: bool,
}

impl Scheduler {
    pub fn new(
        graph: Arc<RwLock<DependencyGraph>>,
        collision: Arc<CollisionChecker>,
        gate: Arc<MergeConflictGate>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            graph,
            collision,
            gate,
            running: RwLock::new(HashMap::new()),
            max_agents: config.max_agents,
            greenfield: config.greenfield,
        }
    }

    /// Select the batch of tasks to spawn this tick.
    pub async fn schedule(&self) -> Vec<Task> {
        if self.gate.is_blocked() {
            debug!("scheduling suppressed: merge conflict active");
            return Vec::new();
        }

        let running = self.running.read().await;
        let slots = self.max_agents.saturating_sub(running.len());
        if slots == 0 {
            return Vec::new();
        }

        let running_tasks: Vec<Task> = running.values().map(|r| r.task.clone()).collect();
        let running_task_ids: HashSet<Uuid> = running_tasks.iter().map(|t| t.id).collect();
        drop(running);

        let candidates: Vec<Task> = {
            let graph = self.graph.read().await;
            graph
                .ready_tasks()
                .into_iter()
                .filter(|id| !running_task_ids.contains(id))
                .filter_map(|id| graph.get(id).cloned())
                .collect()
        };

        let setup_running = running_tasks.iter().any(|t| t.kind.is_setup());
        let running_touches_root = running_tasks.iter().any(|t| self.collision.might_touch_root(t));
        let running_refs: Vec<&Task> = running_tasks.iter().collect();

        let mut admitted: Vec<Task> = Vec::new();
        let mut claimed_critical: HashSet<String> = HashSet::new();
        let mut batch_touches_root = false;

        for task in candidates {
            // Layer 1: setup serialization.
            if setup_running && task.kind.is_setup() {
                debug!(task = %task.title, "rejected: setup task already running");
                continue;
            }

            // Layer 2: critical-file exclusivity against running tasks and
            // earlier admissions in this batch.
            let mut critical = CollisionChecker::critical_file_conflicts(&task, &running_refs);
            for boundary in CollisionChecker::critical_boundaries(&task) {
                if claimed_critical.contains(&boundary) && !critical.contains(&boundary) {
                    critical.push(boundary);
                }
            }
            if !critical.is_empty() {
                debug!(
                    task = %task.title,
                    files = ?critical,
                    "rejected: critical file conflict"
                );
                continue;
            }

            // Layer 3: greenfield root-touching serialization.
            if self.greenfield && self.collision.might_touch_root(&task) {
                if running_touches_root || batch_touches_root {
                    debug!(task = %task.title, "rejected: root-touching task already active");
                    continue;
                }
                batch_touches_root = true;
            }

            // Layer 4: general collision.
            if !self.collision.can_schedule(&task) {
                debug!(task = %task.title, "rejected: path collision with running agent");
                continue;
            }

            for boundary in CollisionChecker::critical_boundaries(&task) {
                claimed_critical.insert(boundary);
            }
            admitted.push(task);
        }

        admitted.sort_by_key(|task| milestone_of(&task.title));
        admitted.truncate(slots);
        admitted
    }

    /// Record an agent start.
    pub async fn on_agent_start(&self, agent_id: Uuid, task: Task) {
        self.running
            .write()
            .await
            .insert(agent_id, RunningAgent { task });
    }

    /// Record an agent completion.
    ///
    /// On success the task joins the graph's completed set. On failure it
    /// does not, and every pending task downstream is marked Blocked;
    /// the newly blocked IDs are returned for the caller to persist and
    /// announce.
    pub async fn on_agent_complete(&self, agent_id: Uuid, success: bool) -> Vec<Uuid> {
        let Some(running) = self.running.write().await.remove(&agent_id) else {
            return Vec::new();
        };
        let task_id = running.task.id;

        let mut graph = self.graph.write().await;
        if success {
            graph.mark_complete(task_id);
            return Vec::new();
        }

        let reason = Task::dependency_failed_reason(task_id);
        let mut blocked = Vec::new();
        let mut downstream: Vec<Uuid> =
            graph.transitive_dependents(task_id).into_iter().collect();
        downstream.sort();
        for dependent in downstream {
            if graph.get(dependent).map(|t| t.status) == Some(TaskStatus::Pending) {
                graph.set_status(dependent, TaskStatus::Blocked, Some(reason.clone()));
                blocked.push(dependent);
            }
        }
        blocked
    }

    /// Number of currently running agents.
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Task IDs currently held by running agents.
    pub async fn running_task_ids(&self) -> HashSet<Uuid> {
        self.running
            .read()
            .await
            .values()
            .map(|r| r.task.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskKind;

    fn scheduler_with(tasks: Vec<Task>, config: SchedulerConfig) -> Scheduler {
        let graph = DependencyGraph::build(tasks).unwrap();
        Scheduler::new(
            Arc::new(RwLock::new(graph)),
            Arc::new(CollisionChecker::default()),
            Arc::new(MergeConflictGate::new()),
            &config,
        )
    }

    fn default_config(max_agents: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_agents,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_milestone_parse() {
        assert_eq!(milestone_of("M1 base"), 1);
        assert_eq!(milestone_of("do M12 now"), 12);
        assert_eq!(milestone_of("no milestone"), u64::MAX);
        assert_eq!(milestone_of("M1x not a tag"), u64::MAX);
    }

    #[tokio::test]
    async fn test_linear_chain_schedules_one_at_a_time() {
        let t1 = Task::new("M1 base", "first");
        let t2 = Task::new("M2 next", "second").with_dependency(t1.id);
        let t3 = Task::new("M3 tail", "third").with_dependency(t2.id);
        let (id1, id2, id3) = (t1.id, t2.id, t3.id);
        let scheduler = scheduler_with(vec![t1, t2, t3], default_config(4));

        let batch = scheduler.schedule().await;
        assert_eq!(batch.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id1]);

        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, batch[0].clone()).await;
        assert!(scheduler.schedule().await.is_empty());
        scheduler.on_agent_complete(agent, true).await;

        let batch = scheduler.schedule().await;
        assert_eq!(batch.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id2]);

        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, batch[0].clone()).await;
        scheduler.on_agent_complete(agent, true).await;

        let batch = scheduler.schedule().await;
        assert_eq!(batch.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id3]);
    }

    #[tokio::test]
    async fn test_diamond_orders_by_milestone() {
        let a = Task::new("M1 A", "a");
        let b = Task::new("M3 B", "b").with_dependency(a.id);
        let c = Task::new("M2 C", "c").with_dependency(a.id);
        let d = Task::new("M4 D", "d")
            .with_dependency(b.id)
            .with_dependency(c.id);
        let (id_a, id_b, id_c, id_d) = (a.id, b.id, c.id, d.id);
        let scheduler = scheduler_with(vec![a, b, c, d], default_config(4));

        let batch = scheduler.schedule().await;
        assert_eq!(batch.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id_a]);

        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, batch[0].clone()).await;
        scheduler.on_agent_complete(agent, true).await;

        // M2 before M3.
        let batch = scheduler.schedule().await;
        assert_eq!(
            batch.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![id_c, id_b]
        );

        for task in batch {
            let agent = Uuid::new_v4();
            scheduler.on_agent_start(agent, task).await;
            scheduler.on_agent_complete(agent, true).await;
        }

        let batch = scheduler.schedule().await;
        assert_eq!(batch.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id_d]);
    }

    #[tokio::test]
    async fn test_capacity_bounds_batch() {
        let tasks: Vec<Task> = (0..6)
            .map(|i| {
                Task::new(format!("M{i} task"), "independent")
                    .with_file_boundaries([format!("mod{i}/")])
            })
            .collect();
        let scheduler = scheduler_with(tasks, default_config(2));
        let batch = scheduler.schedule().await;
        assert_eq!(batch.len(), 2);

        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, batch[0].clone()).await;
        let batch = scheduler.schedule().await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_critical_file_conflict_admits_one() {
        let t1 = Task::new("M1 deps", "bump").with_file_boundaries(["package.json", "src/a/"]);
        let t2 = Task::new("M2 deps", "add").with_file_boundaries(["package.json", "src/b/"]);
        let id1 = t1.id;
        let scheduler = scheduler_with(vec![t1, t2], default_config(4));

        let batch = scheduler.schedule().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id1);
    }

    #[tokio::test]
    async fn test_setup_serialization() {
        let s1 = Task::new("M1 setup", "scaffold").with_kind(TaskKind::Setup);
        let s2 = Task::new("M2 setup", "configure").with_kind(TaskKind::Setup);
        let normal = Task::new("M3 code", "write code").with_file_boundaries(["src/code/"]);
        let (id_s1, id_normal) = (s1.id, normal.id);
        let scheduler = scheduler_with(vec![s1, s2, normal], default_config(4));

        let batch = scheduler.schedule().await;
        let first = batch.iter().find(|t| t.id == id_s1).cloned().unwrap();
        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, first).await;

        // With one setup running, only the normal task is admissible.
        let batch = scheduler.schedule().await;
        let ids: Vec<Uuid> = batch.iter().map(|t| t.id).collect();
        assert!(ids.contains(&id_normal));
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_greenfield_serializes_root_touching_tasks() {
        let t1 = Task::new("M1 deps", "bump").with_file_boundaries(["package.json"]);
        let t2 = Task::new("M2 deps", "add").with_file_boundaries(["go.mod"]);
        let t3 = Task::new("M3 code", "write").with_file_boundaries(["src/code/"]);
        let config = SchedulerConfig {
            max_agents: 4,
            greenfield: true,
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler_with(vec![t1, t2, t3], config);

        // Only one root-toucher admitted per batch; the scoped task rides
        // along.
        let batch = scheduler.schedule().await;
        let root_touchers = batch
            .iter()
            .filter(|t| t.file_boundaries.iter().any(|b| !b.contains('/')))
            .count();
        assert_eq!(root_touchers, 1);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_conflict_gate_blocks_everything() {
        let t1 = Task::new("M1 base", "first");
        let gate = Arc::new(MergeConflictGate::new());
        let graph = DependencyGraph::build(vec![t1]).unwrap();
        let scheduler = Scheduler::new(
            Arc::new(RwLock::new(graph)),
            Arc::new(CollisionChecker::default()),
            gate.clone(),
            &default_config(4),
        );

        gate.set_merge_conflict(Uuid::new_v4(), vec!["src/lib.rs".to_string()]);
        assert!(scheduler.schedule().await.is_empty());

        gate.clear_merge_conflict();
        assert_eq!(scheduler.schedule().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_task_blocks_dependents() {
        let t1 = Task::new("M1 base", "first");
        let t2 = Task::new("M2 next", "second").with_dependency(t1.id);
        let t3 = Task::new("M3 tail", "third").with_dependency(t2.id);
        let (id1, id2, id3) = (t1.id, t2.id, t3.id);

        let graph = Arc::new(RwLock::new(
            DependencyGraph::build(vec![t1, t2, t3]).unwrap(),
        ));
        let scheduler = Scheduler::new(
            graph.clone(),
            Arc::new(CollisionChecker::default()),
            Arc::new(MergeConflictGate::new()),
            &default_config(4),
        );

        let batch = scheduler.schedule().await;
        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, batch[0].clone()).await;
        let blocked = scheduler.on_agent_complete(agent, false).await;
        let mut expected = vec![id2, id3];
        expected.sort();
        assert_eq!(blocked, expected);

        let graph = graph.read().await;
        assert!(graph.ready_tasks().is_empty());
        let t2 = graph.get(id2).unwrap();
        assert_eq!(t2.status, TaskStatus::Blocked);
        assert_eq!(
            t2.blocked_reason.as_deref(),
            Some(Task::dependency_failed_reason(id1).as_str())
        );
    }

    #[tokio::test]
    async fn test_spawn_complete_bookkeeping_round_trip() {
        let t1 = Task::new("M1 base", "first");
        let scheduler = scheduler_with(vec![t1.clone()], default_config(4));
        let before = scheduler.running_count().await;
        let agent = Uuid::new_v4();
        scheduler.on_agent_start(agent, t1).await;
        scheduler.on_agent_complete(agent, true).await;
        assert_eq!(scheduler.running_count().await, before);
    }
}
