//! Command runner port for build/test verification.

use async_trait::async_trait;
use std::path::Path;

/// Runs an external command and returns its combined output.
///
/// A non-zero exit is an error; the error message carries the combined
/// output so verification failures are diagnosable.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, dir: &Path, program: &str, args: &[String]) -> anyhow::Result<String>;
}
