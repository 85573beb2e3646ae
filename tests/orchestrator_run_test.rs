//! End-to-end run-loop tests over mock collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{FixedDecomposer, MemoryStateStore, MockCommandRunner, MockVcs, ScriptedRunner};
use conductor::config::OrchestratorConfig;
use conductor::domain::models::{EventKind, TaskStatus};
use conductor::domain::ports::SubtaskSpec;
use conductor::{Orchestrator, OrchestratorError};

fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.scheduler.max_agents = 4;
    config.scheduler.spawn_stagger_ms = 0;
    config.scheduler.poll_interval_ms = 10;
    config
}

fn linear_specs() -> Vec<SubtaskSpec> {
    let mut first = SubtaskSpec::new("M1 base", "lay the base");
    first.file_boundaries = vec!["src/base/".to_string()];
    let mut second = SubtaskSpec::new("M2 next", "build on the base");
    second.depends_on = vec!["M1 base".to_string()];
    second.file_boundaries = vec!["src/next/".to_string()];
    let mut third = SubtaskSpec::new("M3 tail", "finish up");
    third.depends_on = vec!["M2 next".to_string()];
    third.file_boundaries = vec!["src/tail/".to_string()];
    vec![first, second, third]
}

fn orchestrator(
    specs: Vec<SubtaskSpec>,
    runner: Arc<ScriptedRunner>,
    config: OrchestratorConfig,
) -> (Orchestrator, Arc<MockVcs>) {
    let vcs = Arc::new(MockVcs::new());
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(FixedDecomposer { specs }),
        runner,
        vcs.clone(),
        Arc::new(MockCommandRunner::default()),
    );
    (orchestrator, vcs)
}

#[tokio::test]
async fn test_linear_chain_executes_in_dependency_order() {
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, vcs) = orchestrator(linear_specs(), runner.clone(), fast_config());
    let mut events = orchestrator.events().unwrap();

    let report = orchestrator
        .run(CancellationToken::new(), "build the thing")
        .await
        .unwrap();

    assert_eq!(report.tasks_total, 3);
    assert_eq!(report.tasks_done, 3);
    assert_eq!(report.tasks_failed, 0);
    assert_eq!(report.tasks_blocked, 0);
    assert_eq!(report.total_tokens, 300);

    assert_eq!(
        runner.executed_titles(),
        vec!["M1 base", "M2 next", "M3 tail"]
    );

    // Three agent merges plus the session merge-back to main.
    let state = vcs.state.lock().unwrap();
    assert_eq!(state.merges.len(), 4);
    assert!(state.commits.iter().any(|c| c.starts_with("Merge session")));
    drop(state);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::TaskCompleted).count(),
        3
    );
    assert!(kinds.contains(&EventKind::SessionDone));
    assert!(!kinds.contains(&EventKind::SessionFailed));
}

#[tokio::test]
async fn test_failed_task_blocks_downstream_and_session_finishes() {
    let runner = Arc::new(ScriptedRunner::failing(&["M2 next"]));
    let store = Arc::new(MemoryStateStore::default());
    let vcs = Arc::new(MockVcs::new());
    let orchestrator = Orchestrator::new(
        fast_config(),
        Arc::new(FixedDecomposer {
            specs: linear_specs(),
        }),
        runner,
        vcs,
        Arc::new(MockCommandRunner::default()),
    )
    .with_state_store(store.clone());
    let mut events = orchestrator.events().unwrap();

    let report = orchestrator
        .run(CancellationToken::new(), "build the thing")
        .await
        .unwrap();

    assert_eq!(report.tasks_done, 1);
    assert_eq!(report.tasks_failed, 1);
    assert_eq!(report.tasks_blocked, 1);

    // The blocked task was persisted with its dependency-failure reason.
    let tasks = store.tasks.lock().unwrap();
    let blocked = tasks
        .values()
        .find(|t| t.status == TaskStatus::Blocked)
        .expect("a blocked task was persisted");
    assert!(blocked
        .blocked_reason
        .as_deref()
        .unwrap()
        .starts_with("dependency_failed:"));
    drop(tasks);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::TaskFailed));
    assert!(kinds.contains(&EventKind::TaskBlocked));
    assert!(kinds.contains(&EventKind::SessionDone));
}

#[tokio::test]
async fn test_empty_decomposition_fails_session() {
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, _vcs) = orchestrator(vec![], runner, fast_config());
    let mut events = orchestrator.events().unwrap();

    let result = orchestrator
        .run(CancellationToken::new(), "do nothing")
        .await;

    assert!(matches!(result, Err(OrchestratorError::EmptyDecomposition)));
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::SessionFailed));
}

#[tokio::test]
async fn test_unknown_dependency_fails_session() {
    let mut spec = SubtaskSpec::new("M1 base", "lay the base");
    spec.depends_on = vec!["No such task".to_string()];
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, _vcs) = orchestrator(vec![spec], runner, fast_config());

    let result = orchestrator
        .run(CancellationToken::new(), "build the thing")
        .await;
    assert!(matches!(result, Err(OrchestratorError::Graph(_))));
}

#[tokio::test]
async fn test_stop_ends_session_with_stopped_error() {
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, _vcs) = orchestrator(linear_specs(), runner, fast_config());
    orchestrator.pause_controller().stop();

    let result = orchestrator
        .run(CancellationToken::new(), "build the thing")
        .await;
    assert!(matches!(result, Err(OrchestratorError::Stopped)));
}

#[tokio::test]
async fn test_cancellation_ends_session() {
    let runner = Arc::new(ScriptedRunner {
        latency: Duration::from_millis(200),
        ..ScriptedRunner::new()
    });
    let (orchestrator, _vcs) = orchestrator(linear_specs(), runner, fast_config());
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    let result = orchestrator.run(token, "build the thing").await;
    assert!(matches!(result, Err(OrchestratorError::Canceled)));
}

#[tokio::test]
async fn test_budget_exhaustion_stops_new_spawns() {
    // Each task costs 0.5; a budget of 0.4 exhausts after the first.
    let mut config = fast_config();
    config.budget.budget = 0.4;
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, _vcs) = orchestrator(linear_specs(), runner.clone(), config);

    let report = orchestrator
        .run(CancellationToken::new(), "build the thing")
        .await
        .unwrap();

    assert_eq!(report.tasks_done, 1);
    assert_eq!(runner.executed_titles(), vec!["M1 base"]);
    assert!(orchestrator.budget().is_exhausted());
}

#[tokio::test]
async fn test_pause_delays_scheduling_until_resume() {
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, _vcs) = orchestrator(linear_specs(), runner.clone(), fast_config());
    let orchestrator = Arc::new(orchestrator);
    orchestrator.pause_controller().pause();

    let handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run(CancellationToken::new(), "build the thing")
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(runner.executed_titles().is_empty(), "paused loop spawned work");

    orchestrator.pause_controller().resume();
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.tasks_done, 3);
}
