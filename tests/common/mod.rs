//! Shared mock implementations of the external-collaborator ports.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conductor::domain::models::{
    AgentTier, ConflictPresentation, ExecutionResult, MergeResolution, NativeMergeOutcome, Task,
};
use conductor::domain::ports::{
    AgentRunner, CommandRunner, ExecuteOptions, LlmEvent, LlmEventKind, LlmProcess,
    LlmProcessFactory, MergeResolver, ReviewVerdict, SecondReviewer, StateStore, SubtaskSpec,
    TaskDecomposer, VcsDriver,
};
use conductor::services::second_review::ReviewReason;

// ---------------------------------------------------------------------------
// Decomposer
// ---------------------------------------------------------------------------

/// Returns a fixed set of subtask specs.
pub struct FixedDecomposer {
    pub specs: Vec<SubtaskSpec>,
}

#[async_trait]
impl TaskDecomposer for FixedDecomposer {
    async fn decompose(&self, _request: &str) -> anyhow::Result<Vec<SubtaskSpec>> {
        Ok(self.specs.clone())
    }
}

// ---------------------------------------------------------------------------
// Agent runner
// ---------------------------------------------------------------------------

/// Succeeds or fails by task title, recording execution order.
pub struct ScriptedRunner {
    /// Titles that should fail; everything else succeeds.
    pub failing_titles: HashSet<String>,
    pub executed: Mutex<Vec<String>>,
    /// Per-execution artificial latency.
    pub latency: Duration,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            failing_titles: HashSet::new(),
            executed: Mutex::new(Vec::new()),
            latency: Duration::from_millis(5),
        }
    }

    pub fn failing(titles: &[&str]) -> Self {
        Self {
            failing_titles: titles.iter().map(|t| (*t).to_string()).collect(),
            ..Self::new()
        }
    }

    pub fn executed_titles(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn execute(
        &self,
        token: CancellationToken,
        task: &Task,
        _tier: AgentTier,
        opts: ExecuteOptions,
    ) -> anyhow::Result<ExecutionResult> {
        tokio::select! {
            () = token.cancelled() => anyhow::bail!("canceled"),
            () = tokio::time::sleep(self.latency) => {}
        }
        self.executed.lock().unwrap().push(task.title.clone());
        if self.failing_titles.contains(&task.title) {
            anyhow::bail!("scripted failure for {}", task.title);
        }
        Ok(ExecutionResult {
            success: true,
            tokens_used: 100,
            cost: 0.5,
            duration: self.latency,
            diff: format!("+work for {}\n", task.title),
            changed_files: task.file_boundaries.clone(),
            output_excerpt: String::new(),
            error: None,
            agent_id: opts.agent_id,
        })
    }
}

// ---------------------------------------------------------------------------
// VCS driver
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct VcsState {
    pub branches: HashSet<String>,
    pub current_branch: String,
    pub commits: Vec<String>,
    pub merges: Vec<String>,
    pub resets: Vec<String>,
    pub staged: Vec<String>,
    pub ours_checkouts: Vec<String>,
    pub theirs_checkouts: Vec<String>,
    pub aborted_merges: usize,
    pub deleted_branches: Vec<String>,
    /// Scripted outcomes per merged branch, popped per call.
    pub merge_outcomes: HashMap<String, VecDeque<NativeMergeOutcome>>,
    /// (reference, path) → file contents for `show`.
    pub show_contents: HashMap<(String, String), String>,
}

/// In-memory scriptable VCS driver.
#[derive(Debug, Default)]
pub struct MockVcs {
    pub state: Mutex<VcsState>,
}

impl MockVcs {
    pub fn new() -> Self {
        let vcs = Self::default();
        {
            let mut state = vcs.state.lock().unwrap();
            state.branches.insert("main".to_string());
            state.current_branch = "main".to_string();
        }
        vcs
    }

    /// Script the next outcome of `merge_branch` for a branch.
    pub fn script_merge(&self, branch: &str, outcome: NativeMergeOutcome) {
        self.state
            .lock()
            .unwrap()
            .merge_outcomes
            .entry(branch.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn put_file(&self, reference: &str, path: &str, contents: &str) {
        self.state.lock().unwrap().show_contents.insert(
            (reference.to_string(), path.to_string()),
            contents.to_string(),
        );
    }

    pub fn merged_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().merges.clone()
    }
}

#[async_trait]
impl VcsDriver for MockVcs {
    async fn merge_base(&self, _a: &str, _b: &str) -> anyhow::Result<String> {
        Ok("base".to_string())
    }

    async fn diff_between(&self, _a: &str, _b: &str) -> anyhow::Result<String> {
        Ok("+merged change\n".to_string())
    }

    async fn changed_files_between(&self, _a: &str, _b: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    async fn status(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }

    async fn show(&self, reference: &str, path: &str) -> anyhow::Result<String> {
        let state = self.state.lock().unwrap();
        state
            .show_contents
            .get(&(reference.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no content for {reference}:{path}"))
    }

    async fn add_all(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn commit(&self, message: &str) -> anyhow::Result<()> {
        self.state.lock().unwrap().commits.push(message.to_string());
        Ok(())
    }

    async fn checkout_branch(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.branches.contains(name) {
            anyhow::bail!("branch {name} does not exist");
        }
        state.current_branch = name.to_string();
        Ok(())
    }

    async fn create_and_checkout_branch(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.branches.insert(name.to_string());
        state.current_branch = name.to_string();
        Ok(())
    }

    async fn branch_exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.state.lock().unwrap().branches.contains(name))
    }

    async fn delete_branch(&self, name: &str, _force: bool) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.branches.remove(name);
        state.deleted_branches.push(name.to_string());
        Ok(())
    }

    async fn merge_no_ff(&self, branch: &str, message: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.merges.push(branch.to_string());
        state.commits.push(message.to_string());
        Ok(())
    }

    async fn abort_merge(&self) -> anyhow::Result<()> {
        self.state.lock().unwrap().aborted_merges += 1;
        Ok(())
    }

    async fn checkout_ours(&self, path: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .ours_checkouts
            .push(path.to_string());
        Ok(())
    }

    async fn checkout_theirs(&self, path: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .theirs_checkouts
            .push(path.to_string());
        Ok(())
    }

    async fn reset(&self, reference: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .resets
            .push(reference.to_string());
        Ok(())
    }

    async fn stage_files(&self, paths: &[String]) -> anyhow::Result<()> {
        self.state.lock().unwrap().staged.extend_from_slice(paths);
        Ok(())
    }

    async fn merge_branch(&self, branch: &str, target: &str) -> anyhow::Result<NativeMergeOutcome> {
        let mut state = self.state.lock().unwrap();
        state.merges.push(branch.to_string());
        let scripted = state
            .merge_outcomes
            .get_mut(branch)
            .and_then(VecDeque::pop_front);
        let _ = target;
        Ok(scripted.unwrap_or(NativeMergeOutcome {
            success: true,
            needs_semantic_merge: false,
            conflict_files: vec![],
            diff: Some("+default merge\n".to_string()),
            changed_files: vec![],
        }))
    }
}

// ---------------------------------------------------------------------------
// Command runner
// ---------------------------------------------------------------------------

/// Records invocations; fails when scripted to.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    pub fail: bool,
    pub invocations: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, _dir: &Path, program: &str, args: &[String]) -> anyhow::Result<String> {
        self.invocations
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")));
        if self.fail {
            anyhow::bail!("command failed: {program}");
        }
        Ok("ok".to_string())
    }
}

// ---------------------------------------------------------------------------
// LLM process
// ---------------------------------------------------------------------------

/// Plays back a scripted list of events, tracking kill calls.
pub struct ScriptedLlmProcess {
    events: VecDeque<LlmEvent>,
    pub killed: std::sync::Arc<Mutex<u32>>,
}

#[async_trait]
impl LlmProcess for ScriptedLlmProcess {
    async fn start(&mut self, _prompt: &str, _workdir: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LlmEvent> {
        self.events.pop_front()
    }

    async fn wait(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn kill(&mut self) {
        *self.killed.lock().unwrap() += 1;
    }
}

/// Factory yielding processes that answer with a fixed text, and counts
/// kills across every process it created.
pub struct ScriptedLlmFactory {
    pub responses: Mutex<VecDeque<String>>,
    pub kill_counter: std::sync::Arc<Mutex<u32>>,
    pub spawned: Mutex<u32>,
}

impl ScriptedLlmFactory {
    pub fn answering(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| (*r).to_string()).collect()),
            kill_counter: std::sync::Arc::new(Mutex::new(0)),
            spawned: Mutex::new(0),
        }
    }

    pub fn kills(&self) -> u32 {
        *self.kill_counter.lock().unwrap()
    }

    pub fn spawn_count(&self) -> u32 {
        *self.spawned.lock().unwrap()
    }
}

impl LlmProcessFactory for ScriptedLlmFactory {
    fn create(&self) -> Box<dyn LlmProcess> {
        *self.spawned.lock().unwrap() += 1;
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "no response scripted".to_string());
        let events = VecDeque::from(vec![LlmEvent {
            kind: LlmEventKind::Assistant,
            message: text,
            error: None,
        }]);
        Box::new(ScriptedLlmProcess {
            events,
            killed: self.kill_counter.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Reviewer and resolver
// ---------------------------------------------------------------------------

/// Approves or rejects everything, recording what it saw.
pub struct ScriptedReviewer {
    pub approve: bool,
    pub concerns: Vec<String>,
    pub seen: Mutex<Vec<usize>>,
}

impl ScriptedReviewer {
    pub fn approving() -> Self {
        Self {
            approve: true,
            concerns: vec![],
            seen: Mutex::new(vec![]),
        }
    }

    pub fn rejecting(concerns: &[&str]) -> Self {
        Self {
            approve: false,
            concerns: concerns.iter().map(|c| (*c).to_string()).collect(),
            seen: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl SecondReviewer for ScriptedReviewer {
    async fn review(&self, _diff: &str, reasons: &[ReviewReason]) -> anyhow::Result<ReviewVerdict> {
        self.seen.lock().unwrap().push(reasons.len());
        Ok(ReviewVerdict {
            approved: self.approve,
            concerns: self.concerns.clone(),
        })
    }
}

/// Always answers with a fixed resolution.
pub struct FixedResolver {
    pub resolution: MergeResolution,
    pub presented: Mutex<Vec<usize>>,
}

#[async_trait]
impl MergeResolver for FixedResolver {
    async fn present_conflicts(
        &self,
        presentations: &[ConflictPresentation],
    ) -> anyhow::Result<MergeResolution> {
        self.presented.lock().unwrap().push(presentations.len());
        Ok(self.resolution.clone())
    }
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

/// In-memory task store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    pub tasks: Mutex<HashMap<Uuid, Task>>,
    pub results: Mutex<HashMap<Uuid, ExecutionResult>>,
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_task(&self, task: &Task) -> anyhow::Result<()> {
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn save_result(&self, task_id: Uuid, result: &ExecutionResult) -> anyhow::Result<()> {
        self.results.lock().unwrap().insert(task_id, result.clone());
        Ok(())
    }
}
