//! Concurrent registry of live agents and their execution results.
//!
//! Agents are removed from the live map on completion; results are
//! retained for the session's lifetime.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{Agent, ExecutionResult};

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub live_agents: usize,
    pub stored_results: usize,
}

/// Concurrent map of agents and execution results.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<Uuid, Agent>>,
    results: RwLock<HashMap<Uuid, ExecutionResult>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live agent.
    pub async fn register(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id, agent);
    }

    /// Remove an agent from the live map. The result, if stored, remains.
    pub async fn unregister(&self, agent_id: Uuid) -> Option<Agent> {
        self.agents.write().await.remove(&agent_id)
    }

    /// Store an agent's execution result.
    pub async fn store_result(&self, agent_id: Uuid, result: ExecutionResult) {
        self.results.write().await.insert(agent_id, result);
    }

    /// Look up an execution result.
    pub async fn result(&self, agent_id: Uuid) -> Option<ExecutionResult> {
        self.results.read().await.get(&agent_id).cloned()
    }

    /// Look up a live agent.
    pub async fn agent(&self, agent_id: Uuid) -> Option<Agent> {
        self.agents.read().await.get(&agent_id).cloned()
    }

    /// Snapshot of all live agents.
    pub async fn all_agents(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Number of live agents.
    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_agents: self.agents.read().await.len(),
            stored_results: self.results.read().await.len(),
        }
    }
}
