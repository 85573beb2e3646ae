//! Dependency graph over subtasks.
//!
//! Nodes are tasks, edges point at prerequisites. Provides cycle
//! detection, topological sorting, ready-set queries, and completion
//! bookkeeping.
//!
//! Completion is an explicit set, deliberately separate from
//! [`TaskStatus`]: the scheduler's completion callback and the run loop's
//! status writes race benignly, and readiness must not be driven by
//! half-updated task records.

use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use super::task::{Task, TaskStatus};

/// Graph construction and traversal errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("Task '{task}' depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
    #[error("Cycle detected in task dependencies involving '{task}'")]
    CycleDetected { task: String },
}

/// DFS marking used by cycle detection and topological sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// A dependency graph of tasks.
///
/// Not internally synchronized; callers wrap it in a lock.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<Uuid, Task>,
    /// Task ID → prerequisite IDs.
    edges: HashMap<Uuid, HashSet<Uuid>>,
    /// Task ID → direct dependent IDs (reverse edges).
    dependents: HashMap<Uuid, HashSet<Uuid>>,
    completed: HashSet<Uuid>,
}

impl DependencyGraph {
    /// Build a graph from a set of tasks.
    ///
    /// Registers all nodes first, then edges. Fails with
    /// [`GraphError::UnknownDependency`] if any `depends_on` references a
    /// missing node and [`GraphError::CycleDetected`] if the edges do not
    /// form a DAG.
    pub fn build(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        for task in &tasks {
            graph.edges.insert(task.id, HashSet::new());
            graph.dependents.entry(task.id).or_default();
        }
        for task in tasks {
            for dep in &task.depends_on {
                if !graph.edges.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.title.clone(),
                        dependency: dep.to_string(),
                    });
                }
                graph.edges.get_mut(&task.id).expect("node registered").insert(*dep);
                graph.dependents.get_mut(dep).expect("node registered").insert(task.id);
            }
            graph.nodes.insert(task.id, task);
        }
        if let Some(id) = graph.find_cycle() {
            let task = graph
                .nodes
                .get(&id)
                .map_or_else(|| id.to_string(), |t| t.title.clone());
            return Err(GraphError::CycleDetected { task });
        }
        Ok(graph)
    }

    /// Check whether the graph contains a dependency cycle.
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Three-color DFS over prerequisite edges; returns a node on a cycle.
    fn find_cycle(&self) -> Option<Uuid> {
        let mut marks: HashMap<Uuid, Mark> =
            self.edges.keys().map(|&id| (id, Mark::White)).collect();
        for &id in self.edges.keys() {
            if marks[&id] == Mark::White {
                if let Some(on_cycle) = self.cycle_dfs(id, &mut marks) {
                    return Some(on_cycle);
                }
            }
        }
        None
    }

    fn cycle_dfs(&self, id: Uuid, marks: &mut HashMap<Uuid, Mark>) -> Option<Uuid> {
        marks.insert(id, Mark::Gray);
        if let Some(deps) = self.edges.get(&id) {
            for &dep in deps {
                match marks.get(&dep) {
                    Some(Mark::Gray) => return Some(dep),
                    Some(Mark::White) => {
                        if let Some(found) = self.cycle_dfs(dep, marks) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
        }
        marks.insert(id, Mark::Black);
        None
    }

    /// Topological order, dependencies first.
    pub fn topological_sort(&self) -> Result<Vec<Uuid>, GraphError> {
        let mut marks: HashMap<Uuid, Mark> =
            self.edges.keys().map(|&id| (id, Mark::White)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        // Sort roots for deterministic output across runs.
        let mut ids: Vec<Uuid> = self.edges.keys().copied().collect();
        ids.sort();
        for id in ids {
            if marks[&id] == Mark::White {
                self.topo_dfs(id, &mut marks, &mut order)?;
            }
        }
        Ok(order)
    }

    fn topo_dfs(
        &self,
        id: Uuid,
        marks: &mut HashMap<Uuid, Mark>,
        order: &mut Vec<Uuid>,
    ) -> Result<(), GraphError> {
        marks.insert(id, Mark::Gray);
        if let Some(deps) = self.edges.get(&id) {
            let mut deps: Vec<Uuid> = deps.iter().copied().collect();
            deps.sort();
            for dep in deps {
                match marks.get(&dep) {
                    Some(Mark::Gray) => {
                        let task = self
                            .nodes
                            .get(&dep)
                            .map_or_else(|| dep.to_string(), |t| t.title.clone());
                        return Err(GraphError::CycleDetected { task });
                    }
                    Some(Mark::White) => self.topo_dfs(dep, marks, order)?,
                    _ => {}
                }
            }
        }
        marks.insert(id, Mark::Black);
        order.push(id);
        Ok(())
    }

    /// Task IDs that are ready to run.
    ///
    /// A task is ready iff it is Pending, not itself in the completed set,
    /// and every prerequisite is completed (or its task record already
    /// reads Done, as a fallback while the set catches up).
    pub fn ready_tasks(&self) -> Vec<Uuid> {
        let mut ready: Vec<Uuid> = self
            .nodes
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| !self.completed.contains(&task.id))
            .filter(|task| {
                task.depends_on.iter().all(|dep| {
                    self.completed.contains(dep)
                        || self
                            .nodes
                            .get(dep)
                            .is_some_and(|t| t.status == TaskStatus::Done)
                })
            })
            .map(|task| task.id)
            .collect();
        ready.sort();
        ready
    }

    /// Record a task as complete. Idempotent. Only successful tasks are
    /// marked; failed tasks never unblock their dependents.
    pub fn mark_complete(&mut self, id: Uuid) {
        if self.nodes.contains_key(&id) {
            self.completed.insert(id);
        }
    }

    /// Whether a task has been marked complete.
    pub fn is_complete(&self, id: Uuid) -> bool {
        self.completed.contains(&id)
    }

    /// Direct dependents of a task.
    pub fn dependents_of(&self, id: Uuid) -> Vec<Uuid> {
        self.dependents
            .get(&id)
            .map(|set| {
                let mut v: Vec<Uuid> = set.iter().copied().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }

    /// All tasks downstream of a task (transitive reverse-edge walk).
    pub fn transitive_dependents(&self, id: Uuid) -> HashSet<Uuid> {
        let mut result = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::new();
        if let Some(direct) = self.dependents.get(&id) {
            queue.extend(direct);
        }
        while let Some(next) = queue.pop_front() {
            if result.insert(next) {
                if let Some(further) = self.dependents.get(&next) {
                    queue.extend(further);
                }
            }
        }
        result
    }

    /// Look up a task.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.nodes.get(&id)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.nodes.get_mut(&id)
    }

    /// Set a task's status, clearing or recording the blocked reason.
    pub fn set_status(&mut self, id: Uuid, status: TaskStatus, blocked_reason: Option<String>) {
        if let Some(task) = self.nodes.get_mut(&id) {
            task.status = status;
            task.blocked_reason = blocked_reason;
        }
    }

    /// Iterate over all tasks.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(title: &str, deps: Vec<Uuid>) -> Task {
        let mut task = Task::new(title, "graph test task");
        task.depends_on = deps;
        task
    }

    #[test]
    fn test_build_linear_chain() {
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let t3 = make_task("three", vec![t2.id]);
        let (id1, id2, id3) = (t1.id, t2.id, t3.id);

        let graph = DependencyGraph::build(vec![t1, t2, t3]).unwrap();
        assert_eq!(graph.len(), 3);
        assert!(!graph.has_cycle());
        assert_eq!(graph.ready_tasks(), vec![id1]);
        assert_eq!(graph.dependents_of(id1), vec![id2]);
        assert_eq!(graph.dependents_of(id3), Vec::<Uuid>::new());
    }

    #[test]
    fn test_build_rejects_unknown_dependency() {
        let missing = Uuid::new_v4();
        let t1 = make_task("one", vec![missing]);
        let err = DependencyGraph::build(vec![t1]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_build_rejects_cycle() {
        let mut t1 = make_task("one", vec![]);
        let mut t2 = make_task("two", vec![]);
        let mut t3 = make_task("three", vec![]);
        t1.depends_on = vec![t3.id];
        t2.depends_on = vec![t1.id];
        t3.depends_on = vec![t2.id];
        let err = DependencyGraph::build(vec![t1, t2, t3]).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_topological_sort_dependency_first() {
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let t3 = make_task("three", vec![t1.id]);
        let t4 = make_task("four", vec![t2.id, t3.id]);
        let ids = (t1.id, t2.id, t3.id, t4.id);

        let graph = DependencyGraph::build(vec![t1, t2, t3, t4]).unwrap();
        let order = graph.topological_sort().unwrap();
        let pos = |id: Uuid| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(ids.0) < pos(ids.1));
        assert!(pos(ids.0) < pos(ids.2));
        assert!(pos(ids.1) < pos(ids.3));
        assert!(pos(ids.2) < pos(ids.3));
    }

    #[test]
    fn test_ready_set_advances_on_completion() {
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let (id1, id2) = (t1.id, t2.id);

        let mut graph = DependencyGraph::build(vec![t1, t2]).unwrap();
        assert_eq!(graph.ready_tasks(), vec![id1]);

        graph.set_status(id1, TaskStatus::InProgress, None);
        assert!(graph.ready_tasks().is_empty());

        graph.set_status(id1, TaskStatus::Done, None);
        graph.mark_complete(id1);
        assert_eq!(graph.ready_tasks(), vec![id2]);
    }

    #[test]
    fn test_status_done_fallback_unblocks() {
        // A prerequisite whose record reads Done unblocks dependents even
        // before the completion set catches up.
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let (id1, id2) = (t1.id, t2.id);

        let mut graph = DependencyGraph::build(vec![t1, t2]).unwrap();
        graph.set_status(id1, TaskStatus::Done, None);
        assert_eq!(graph.ready_tasks(), vec![id2]);
    }

    #[test]
    fn test_failed_prerequisite_never_unblocks() {
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let id1 = t1.id;

        let mut graph = DependencyGraph::build(vec![t1, t2]).unwrap();
        graph.set_status(id1, TaskStatus::Failed, None);
        assert!(graph.ready_tasks().is_empty());
    }

    #[test]
    fn test_mark_complete_idempotent() {
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let (id1, id2) = (t1.id, t2.id);

        let mut graph = DependencyGraph::build(vec![t1, t2]).unwrap();
        graph.set_status(id1, TaskStatus::Done, None);
        graph.mark_complete(id1);
        let ready = graph.ready_tasks();
        graph.mark_complete(id1);
        assert_eq!(graph.ready_tasks(), ready);
        assert_eq!(ready, vec![id2]);
        assert_eq!(graph.completed_count(), 1);
    }

    #[test]
    fn test_transitive_dependents_walk() {
        let t1 = make_task("one", vec![]);
        let t2 = make_task("two", vec![t1.id]);
        let t3 = make_task("three", vec![t2.id]);
        let t4 = make_task("four", vec![]);
        let (id1, id2, id3) = (t1.id, t2.id, t3.id);

        let graph = DependencyGraph::build(vec![t1, t2, t3, t4]).unwrap();
        let downstream = graph.transitive_dependents(id1);
        assert_eq!(downstream.len(), 2);
        assert!(downstream.contains(&id2));
        assert!(downstream.contains(&id3));
    }
}
