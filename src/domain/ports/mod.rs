//! Ports (trait interfaces) over external collaborators.
//!
//! The orchestrator core never talks to an LLM, a git binary, or a
//! database directly; everything outside the core crosses one of these
//! narrow seams. Implementations live with the embedding application.

pub mod command;
pub mod decomposer;
pub mod executor;
pub mod llm;
pub mod review;
pub mod store;
pub mod vcs;

pub use command::CommandRunner;
pub use decomposer::{SubtaskSpec, TaskDecomposer};
pub use executor::{AgentRunner, ExecuteOptions, ProgressCallback};
pub use llm::{LlmEvent, LlmEventKind, LlmProcess, LlmProcessFactory};
pub use review::{MergeResolver, ReviewVerdict, SecondReviewer};
pub use store::{LearningStore, SessionTracker, StateStore};
pub use vcs::VcsDriver;
