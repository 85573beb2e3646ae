//! Conductor - multi-agent coding orchestrator core.
//!
//! Takes a high-level change request against a source repository,
//! decomposes it into a dependency graph of subtasks, executes those
//! subtasks concurrently via external coding agents (each on a private
//! branch), and integrates the results through a serialized, verified
//! merge pipeline.
//!
//! External collaborators (decomposer, agent runner, VCS driver, command
//! runner, LLM runner, state store, reviewers) are consumed through the
//! traits in [`domain::ports`].

pub mod config;
pub mod domain;
pub mod logging;
pub mod services;

// Re-export key types for convenience
pub use config::OrchestratorConfig;
pub use domain::errors::{OrchestratorError, OrchestratorResult};
pub use domain::models::{
    Agent, AgentStatus, AgentTier, DependencyGraph, ExecutionResult, MergeOutcome, MergeRequest,
    OrchestratorEvent, Task, TaskKind, TaskStatus,
};
pub use services::orchestrator::{Orchestrator, SessionReport};
