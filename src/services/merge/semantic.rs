//! LLM-assisted semantic merge.
//!
//! Runs one external LLM process per attempt, feeding it the conflicted
//! files and applying the merged contents it returns to the working
//! tree. The process is always killed after an attempt, whatever the
//! outcome. The response payload is JSON, located inside the model's
//! concatenated text output by brace matching.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::ConflictFile;
use crate::domain::ports::{LlmEventKind, LlmProcess, LlmProcessFactory};

/// Marker the model may emit when a conflict needs human judgment.
const NEEDS_HUMAN_MARKER: &str = "NEEDS_HUMAN";

/// Outcome of one semantic merge attempt.
#[derive(Debug, Clone)]
pub enum SemanticMergeOutcome {
    /// Merged contents were written to the working tree.
    Applied {
        files: Vec<String>,
        reasoning: String,
    },
    /// The model declined; escalate without further retries.
    NeedsHuman,
}

/// JSON payload expected from the model.
#[derive(Debug, Deserialize)]
struct SemanticMergePayload {
    merged_files: HashMap<String, String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    needs_human: bool,
}

/// Semantic merger over an external LLM process.
pub struct SemanticMerger {
    factory: Arc<dyn LlmProcessFactory>,
    timeout: Duration,
}

impl SemanticMerger {
    pub fn new(factory: Arc<dyn LlmProcessFactory>, timeout: Duration) -> Self {
        Self { factory, timeout }
    }

    /// Run one attempt over the given conflicts.
    ///
    /// Applies merged files on success. Errors cover timeouts, process
    /// failures, and unparseable output; the caller decides on retries.
    pub async fn merge(
        &self,
        token: &CancellationToken,
        workdir: &Path,
        conflicts: &[ConflictFile],
    ) -> OrchestratorResult<SemanticMergeOutcome> {
        let prompt = build_prompt(conflicts);
        let mut process = self.factory.create();

        // The process must die with the attempt, so the whole interaction
        // runs inside one guarded block and `kill` follows unconditionally.
        let collected = tokio::select! {
            () = token.cancelled() => Err(OrchestratorError::Canceled),
            collected = tokio::time::timeout(
                self.timeout,
                run_attempt(process.as_mut(), &prompt, workdir),
            ) => match collected {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::SemanticMerge(format!(
                    "attempt timed out after {:?}",
                    self.timeout
                ))),
            },
        };
        process.kill().await;
        let text = collected?;

        if text.contains(NEEDS_HUMAN_MARKER) {
            return Ok(SemanticMergeOutcome::NeedsHuman);
        }

        let payload = parse_payload(&text)?;
        if payload.needs_human {
            return Ok(SemanticMergeOutcome::NeedsHuman);
        }
        if payload.merged_files.is_empty() {
            return Err(OrchestratorError::SemanticMerge(
                "model returned no merged files".to_string(),
            ));
        }

        let mut files = Vec::with_capacity(payload.merged_files.len());
        for (path, content) in &payload.merged_files {
            let full: PathBuf = workdir.join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| OrchestratorError::SemanticMerge(e.to_string()))?;
            }
            tokio::fs::write(&full, content)
                .await
                .map_err(|e| OrchestratorError::SemanticMerge(e.to_string()))?;
            files.push(path.clone());
        }
        files.sort();
        debug!(files = ?files, "semantic merge applied");

        Ok(SemanticMergeOutcome::Applied {
            files,
            reasoning: payload.reasoning,
        })
    }
}

/// Drive one process from start to exhausted output; returns the
/// concatenated Assistant + Result text.
async fn run_attempt(
    process: &mut dyn LlmProcess,
    prompt: &str,
    workdir: &Path,
) -> OrchestratorResult<String> {
    process
        .start(prompt, workdir)
        .await
        .map_err(|e| OrchestratorError::SemanticMerge(e.to_string()))?;

    let mut text = String::new();
    while let Some(event) = process.next_event().await {
        match event.kind {
            LlmEventKind::Assistant | LlmEventKind::Result => text.push_str(&event.message),
            LlmEventKind::Error => {
                let detail = event.error.unwrap_or(event.message);
                return Err(OrchestratorError::SemanticMerge(detail));
            }
        }
    }
    if let Err(err) = process.wait().await {
        warn!(error = %err, "semantic merge process exited abnormally");
    }
    Ok(text)
}

fn build_prompt(conflicts: &[ConflictFile]) -> String {
    use std::fmt::Write as _;
    let mut prompt = String::from(
        "Resolve the following merge conflicts. Respond with JSON of the form \
         {\"merged_files\": {\"path\": \"content\"}, \"reasoning\": \"...\"}. \
         Set \"needs_human\": true if a conflict requires human judgment.\n",
    );
    for conflict in conflicts {
        let _ = write!(
            prompt,
            "\n=== {path} ===\n--- session side ---\n{ours}\n--- agent side ---\n{theirs}\n",
            path = conflict.path,
            ours = conflict.ours,
            theirs = conflict.theirs,
        );
    }
    prompt
}

/// Locate and parse the JSON payload in the model's text output: first
/// `{` through its matching `}`, string-aware.
fn parse_payload(text: &str) -> OrchestratorResult<SemanticMergePayload> {
    let json = extract_json_object(text).ok_or_else(|| {
        OrchestratorError::SemanticMerge("no JSON object found in model output".to_string())
    })?;
    serde_json::from_str(json)
        .map_err(|e| OrchestratorError::SemanticMerge(format!("malformed payload: {e}")))
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
