//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod approval;
pub mod event;
pub mod graph;
pub mod merge;
pub mod task;

pub use agent::{Agent, AgentProgress, AgentStatus, ExecutionResult, SpawnResult};
pub use approval::{Approval, ApprovalRequest, ApprovalResponse, ApprovedBy};
pub use event::{EventKind, OrchestratorEvent};
pub use graph::{DependencyGraph, GraphError};
pub use merge::{
    ConflictFile, ConflictPresentation, MergeOutcome, MergeRequest, MergeResolution,
    NativeMergeOutcome, ResolutionStrategy,
};
pub use task::{AgentTier, Task, TaskKind, TaskStatus};
