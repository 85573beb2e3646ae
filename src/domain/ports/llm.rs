//! External LLM process port, used by the semantic merger and second
//! reviewer plumbing.

use async_trait::async_trait;
use std::path::Path;

/// Kind of event produced by the external LLM process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmEventKind {
    Assistant,
    Result,
    Error,
}

/// One streamed event from the process.
#[derive(Debug, Clone)]
pub struct LlmEvent {
    pub kind: LlmEventKind,
    pub message: String,
    pub error: Option<String>,
}

/// Handle on one external LLM invocation.
///
/// Callers must invoke [`kill`](LlmProcess::kill) after every attempt,
/// whatever the outcome; `kill` is idempotent.
#[async_trait]
pub trait LlmProcess: Send {
    /// Start the process; returns immediately.
    async fn start(&mut self, prompt: &str, workdir: &Path) -> anyhow::Result<()>;

    /// Next streamed event, or `None` once the stream is exhausted.
    async fn next_event(&mut self) -> Option<LlmEvent>;

    /// Wait for the process to finish.
    async fn wait(&mut self) -> anyhow::Result<()>;

    /// Terminate the process. Idempotent.
    async fn kill(&mut self);
}

/// Constructs fresh [`LlmProcess`] handles; one per merge attempt.
pub trait LlmProcessFactory: Send + Sync {
    fn create(&self) -> Box<dyn LlmProcess>;
}
