//! Collision and ownership checking for concurrent agents.
//!
//! Each live agent registers the path prefixes it intends to touch; the
//! checker rejects candidate tasks whose prefixes overlap a running
//! agent's claim, contain one of its hotspots, or would saturate a
//! top-level directory. It also provides the pre-flight overlap analysis
//! used to size a session's parallelism.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use crate::config::CollisionConfig;
use crate::domain::models::Task;

/// File names whose concurrent edits are known to be fragile.
const CRITICAL_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "go.mod",
    "go.sum",
    "cargo.toml",
    "cargo.lock",
    "pyproject.toml",
    "requirements.txt",
    "poetry.lock",
    "tsconfig.json",
    "composer.json",
    "gemfile",
    "gemfile.lock",
    "makefile",
    "dockerfile",
];

/// Directory tokens recognized when deriving prefixes from task text.
const DIRECTORY_MARKERS: &[&str] = &[
    "internal/", "pkg/", "src/", "lib/", "cmd/", "app/", "api/", "server/", "client/", "tests/",
    "test/", "docs/", "services/", "components/",
];

/// Whether a path names a project-critical config file.
pub fn is_critical_file(path: &str) -> bool {
    let name = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_lowercase();
    CRITICAL_FILES.contains(&name.as_str())
}

/// Strip a leading slash and normalize separators.
fn normalize(path: &str) -> String {
    path.trim_start_matches('/').replace('\\', "/")
}

/// Normalize a boundary into a prefix: directories keep a trailing `/`,
/// file paths are reduced to their containing directory.
fn normalize_prefix(boundary: &str) -> String {
    let path = normalize(boundary);
    if path.ends_with('/') {
        return path;
    }
    let last = path.rsplit('/').next().unwrap_or(&path);
    if last.contains('.') {
        // Looks like a file; claim its directory.
        match path.rfind('/') {
            Some(idx) => path[..=idx].to_string(),
            None => path, // root-level file, claimed as-is
        }
    } else {
        format!("{path}/")
    }
}

/// Top-level directory of a prefix, if it has one.
fn top_level(prefix: &str) -> Option<&str> {
    let trimmed = prefix.trim_start_matches('/');
    trimmed.find('/').map(|idx| &trimmed[..idx])
}

/// Scheduling hints registered for one live agent.
#[derive(Debug, Clone, Default)]
pub struct SchedulerHint {
    /// Normalized path prefixes (trailing `/` for directories).
    pub path_prefixes: Vec<String>,
    /// Files this agent has touched beyond the hotspot threshold.
    pub hotspots: Vec<String>,
}

/// One overlapping pair found by pre-flight analysis.
#[derive(Debug, Clone)]
pub struct OverlapPair {
    pub first: Uuid,
    pub second: Uuid,
    /// Prefixes that overlap between the two tasks.
    pub prefixes: Vec<String>,
}

/// Result of pairwise pre-flight overlap analysis.
#[derive(Debug, Clone, Default)]
pub struct PreFlightAnalysis {
    pub overlaps: Vec<OverlapPair>,
    /// Size of the largest independent batch under the overlap graph.
    pub recommended_parallelism: usize,
}

#[derive(Debug, Default)]
struct Inner {
    agents: HashMap<Uuid, SchedulerHint>,
    touch_counts: HashMap<String, u32>,
}

/// Pre-flight and per-batch collision admission.
pub struct CollisionChecker {
    policy: CollisionConfig,
    inner: RwLock<Inner>,
}

impl CollisionChecker {
    pub fn new(policy: CollisionConfig) -> Self {
        Self {
            policy,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a live agent's claim.
    pub fn register_agent(&self, agent_id: Uuid, path_prefixes: Vec<String>, hotspots: Vec<String>) {
        let hint = SchedulerHint {
            path_prefixes: path_prefixes.iter().map(|p| normalize_prefix(p)).collect(),
            hotspots: hotspots.into_iter().map(|p| normalize(&p)).collect(),
        };
        self.inner
            .write()
            .expect("collision lock poisoned")
            .agents
            .insert(agent_id, hint);
    }

    /// Drop a completed agent's claim.
    pub fn unregister_agent(&self, agent_id: Uuid) {
        self.inner
            .write()
            .expect("collision lock poisoned")
            .agents
            .remove(&agent_id);
    }

    /// Record one file touch by an agent. Once the cumulative count for
    /// the path passes the threshold, the path joins that agent's
    /// hotspots (deduplicated).
    pub fn record_touch(&self, agent_id: Uuid, path: &str) {
        let path = normalize(path);
        let mut inner = self.inner.write().expect("collision lock poisoned");
        let count = inner.touch_counts.entry(path.clone()).or_insert(0);
        *count += 1;
        let promoted = *count > self.policy.hotspot_threshold;
        if promoted {
            if let Some(hint) = inner.agents.get_mut(&agent_id) {
                if !hint.hotspots.contains(&path) {
                    hint.hotspots.push(path);
                }
            }
        }
    }

    /// All paths whose touch count is above the threshold.
    pub fn hotspots(&self) -> Vec<String> {
        let inner = self.inner.read().expect("collision lock poisoned");
        let mut paths: Vec<String> = inner
            .touch_counts
            .iter()
            .filter(|(_, &count)| count > self.policy.hotspot_threshold)
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Hotspots registered for one agent.
    pub fn agent_hotspots(&self, agent_id: Uuid) -> Vec<String> {
        let inner = self.inner.read().expect("collision lock poisoned");
        inner
            .agents
            .get(&agent_id)
            .map(|hint| hint.hotspots.clone())
            .unwrap_or_default()
    }

    /// Derive the path prefixes a task is expected to touch.
    ///
    /// Prefers explicit file boundaries; otherwise scans the title and
    /// description for tokens carrying well-known directory markers.
    pub fn extract_path_prefixes(&self, task: &Task) -> Vec<String> {
        if !task.file_boundaries.is_empty() {
            let mut seen = HashSet::new();
            return task
                .file_boundaries
                .iter()
                .map(|b| normalize_prefix(b))
                .filter(|p| seen.insert(p.clone()))
                .collect();
        }

        let mut prefixes = Vec::new();
        let mut seen = HashSet::new();
        let text = format!("{} {}", task.title, task.description);
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != '.' && c != '_' && c != '-');
            if token.is_empty() || !token.contains('/') {
                continue;
            }
            let lowered = token.to_lowercase();
            if DIRECTORY_MARKERS.iter().any(|m| lowered.contains(m)) {
                let prefix = normalize_prefix(token);
                if seen.insert(prefix.clone()) {
                    prefixes.push(prefix);
                }
            }
        }
        prefixes
    }

    /// Whether the candidate can run alongside every registered agent.
    ///
    /// Rejects on symmetric prefix containment, on a candidate prefix
    /// containing a running agent's hotspot, and on top-level directory
    /// saturation.
    pub fn can_schedule(&self, task: &Task) -> bool {
        let candidate = self.extract_path_prefixes(task);
        if candidate.is_empty() {
            // Nothing claimed; only the top-level cap could apply, and it
            // needs a prefix to count against.
            return true;
        }
        let inner = self.inner.read().expect("collision lock poisoned");

        for hint in inner.agents.values() {
            for prefix in &candidate {
                for claimed in &hint.path_prefixes {
                    if prefix.starts_with(claimed.as_str()) || claimed.starts_with(prefix.as_str())
                    {
                        return false;
                    }
                }
                for hotspot in &hint.hotspots {
                    if hotspot.starts_with(prefix.as_str()) {
                        return false;
                    }
                }
            }
        }

        // Top-level saturation.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for hint in inner.agents.values() {
            let mut tops: HashSet<&str> = HashSet::new();
            for claimed in &hint.path_prefixes {
                if let Some(top) = top_level(claimed) {
                    tops.insert(top);
                }
            }
            for top in tops {
                *counts.entry(top).or_insert(0) += 1;
            }
        }
        for prefix in &candidate {
            if let Some(top) = top_level(prefix) {
                if counts.get(top).copied().unwrap_or(0) >= self.policy.max_agents_per_top_level {
                    return false;
                }
            }
        }
        true
    }

    /// Whether the task plausibly touches the repository root: a critical
    /// config file boundary, a root-level file boundary, or a
    /// root-touching keyword in the description.
    pub fn might_touch_root(&self, task: &Task) -> bool {
        for boundary in &task.file_boundaries {
            let normalized = normalize(boundary);
            if is_critical_file(&normalized) {
                return true;
            }
            if !normalized.contains('/') {
                return true;
            }
        }
        let description = task.description.to_lowercase();
        let title = task.title.to_lowercase();
        self.policy
            .root_keywords
            .iter()
            .any(|k| description.contains(&k.to_lowercase()) || title.contains(&k.to_lowercase()))
    }

    /// Critical file boundaries of a task.
    pub fn critical_boundaries(task: &Task) -> Vec<String> {
        task.file_boundaries
            .iter()
            .map(|b| normalize(b))
            .filter(|b| is_critical_file(b))
            .collect()
    }

    /// Critical files the candidate shares with any running task.
    pub fn critical_file_conflicts(task: &Task, running: &[&Task]) -> Vec<String> {
        let candidate: HashSet<String> = Self::critical_boundaries(task).into_iter().collect();
        if candidate.is_empty() {
            return Vec::new();
        }
        let mut conflicts: Vec<String> = Vec::new();
        for other in running {
            for boundary in Self::critical_boundaries(other) {
                if candidate.contains(&boundary) && !conflicts.contains(&boundary) {
                    conflicts.push(boundary);
                }
            }
        }
        conflicts.sort();
        conflicts
    }

    /// Pairwise overlap analysis over a task set.
    ///
    /// The recommended parallelism is the size of the largest independent
    /// set under the overlap graph, estimated by greedy coloring: each
    /// task takes the smallest color unused by its overlap-neighbors, and
    /// the largest color class wins.
    pub fn analyze_preflight(&self, tasks: &[Task]) -> PreFlightAnalysis {
        let prefixes: Vec<Vec<String>> =
            tasks.iter().map(|t| self.extract_path_prefixes(t)).collect();

        let mut overlaps = Vec::new();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for i in 0..tasks.len() {
            for j in (i + 1)..tasks.len() {
                let mut shared: Vec<String> = Vec::new();
                for a in &prefixes[i] {
                    for b in &prefixes[j] {
                        if a.starts_with(b.as_str()) || b.starts_with(a.as_str()) {
                            let shorter = if a.len() <= b.len() { a } else { b };
                            if !shared.contains(shorter) {
                                shared.push(shorter.clone());
                            }
                        }
                    }
                }
                if !shared.is_empty() {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                    overlaps.push(OverlapPair {
                        first: tasks[i].id,
                        second: tasks[j].id,
                        prefixes: shared,
                    });
                }
            }
        }

        // Greedy coloring; color classes are independent sets.
        let mut colors: Vec<usize> = vec![usize::MAX; tasks.len()];
        for i in 0..tasks.len() {
            let used: HashSet<usize> = adjacency[i]
                .iter()
                .map(|&n| colors[n])
                .filter(|&c| c != usize::MAX)
                .collect();
            let mut color = 0;
            while used.contains(&color) {
                color += 1;
            }
            colors[i] = color;
        }
        let mut class_sizes: HashMap<usize, usize> = HashMap::new();
        for &color in &colors {
            if color != usize::MAX {
                *class_sizes.entry(color).or_insert(0) += 1;
            }
        }
        let recommended_parallelism = class_sizes.values().copied().max().unwrap_or(0);

        PreFlightAnalysis {
            overlaps,
            recommended_parallelism,
        }
    }
}

impl Default for CollisionChecker {
    fn default() -> Self {
        Self::new(CollisionConfig::default())
    }
}
