//! Second-review rule engine.
//!
//! Decides whether a successful merge's diff warrants an additional LLM
//! review before the commit is finalized: protected files, large diffs,
//! source files without sibling tests, or cross-cutting changes.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ReviewConfig;
use crate::services::protected::ProtectedAreaDetector;

/// Extensions treated as source code for the sibling-test heuristic.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "go", "ts", "tsx", "js", "jsx", "py", "java", "rb", "c", "cc", "cpp", "h", "hpp", "cs",
    "kt", "swift",
];

/// Name fragments that mark a file as a test.
const TEST_MARKERS: &[&str] = &["_test", ".test", "_spec", ".spec"];
const TEST_PREFIX: &str = "test_";

/// Why a second review fired. Collected as an unordered set of reasons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReviewReason {
    /// A changed file is in a protected area.
    ProtectedFile(String),
    /// The diff exceeds the configured line threshold.
    LargeDiff { lines: usize },
    /// A changed source file has no sibling test among the changes.
    MissingTests { file: String },
    /// Changes span more packages than the configured threshold.
    CrossCutting { packages: usize },
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProtectedFile(path) => write!(f, "protected file changed: {path}"),
            Self::LargeDiff { lines } => write!(f, "large diff: {lines} lines"),
            Self::MissingTests { file } => write!(f, "no sibling test for {file}"),
            Self::CrossCutting { packages } => {
                write!(f, "changes span {packages} packages")
            }
        }
    }
}

/// Rule engine over a merge's diff and changed-file list.
pub struct SecondReviewTrigger {
    protected: Arc<ProtectedAreaDetector>,
    config: ReviewConfig,
}

/// Base name with directory and extension stripped, test markers removed.
fn test_base_name(file: &str) -> String {
    let name = file.rsplit('/').next().unwrap_or(file);
    let stem = name.split('.').next().unwrap_or(name);
    let mut base = stem.to_lowercase();
    for marker in TEST_MARKERS {
        if let Some(stripped) = base.strip_suffix(marker) {
            base = stripped.to_string();
        }
    }
    if let Some(stripped) = base.strip_prefix(TEST_PREFIX) {
        base = stripped.to_string();
    }
    base
}

fn extension(file: &str) -> Option<&str> {
    let name = file.rsplit('/').next().unwrap_or(file);
    name.rsplit_once('.').map(|(_, ext)| ext)
}

pub(crate) fn is_source_file(file: &str) -> bool {
    extension(file).is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn is_test_file(file: &str) -> bool {
    let name = file.rsplit('/').next().unwrap_or(file).to_lowercase();
    let stem = name.split('.').next().unwrap_or(&name);
    name.contains(".test.")
        || name.contains(".spec.")
        || stem.starts_with(TEST_PREFIX)
        || TEST_MARKERS.iter().any(|m| stem.ends_with(m))
        || file.to_lowercase().contains("/tests/")
}

impl SecondReviewTrigger {
    pub fn new(protected: Arc<ProtectedAreaDetector>, config: ReviewConfig) -> Self {
        Self { protected, config }
    }

    /// Evaluate all rules; an empty result means no review is needed.
    pub fn evaluate(&self, diff: &str, changed_files: &[String]) -> Vec<ReviewReason> {
        let mut reasons: Vec<ReviewReason> = Vec::new();

        for file in changed_files {
            if self.protected.is_protected(file) {
                reasons.push(ReviewReason::ProtectedFile(file.clone()));
            }
        }

        let lines = diff.lines().count();
        if lines > self.config.large_diff_threshold {
            reasons.push(ReviewReason::LargeDiff { lines });
        }

        let test_bases: HashSet<String> = changed_files
            .iter()
            .filter(|f| is_test_file(f))
            .map(|f| test_base_name(f))
            .collect();
        for file in changed_files {
            if is_source_file(file) && !is_test_file(file) {
                let base = test_base_name(file);
                if !test_bases.contains(&base) {
                    reasons.push(ReviewReason::MissingTests { file: file.clone() });
                }
            }
        }

        let packages: HashSet<&str> = changed_files
            .iter()
            .map(|f| f.rsplit_once('/').map_or("", |(dir, _)| dir))
            .collect();
        if packages.len() > self.config.cross_cutting_threshold {
            reasons.push(ReviewReason::CrossCutting {
                packages: packages.len(),
            });
        }

        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> SecondReviewTrigger {
        SecondReviewTrigger::new(
            Arc::new(ProtectedAreaDetector::default()),
            ReviewConfig::default(),
        )
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_no_reasons_for_small_tested_change() {
        let reasons = trigger().evaluate(
            "+one line\n",
            &strings(&["src/api/users.rs", "src/api/users_test.rs"]),
        );
        assert!(reasons.is_empty(), "unexpected reasons: {reasons:?}");
    }

    #[test]
    fn test_protected_file_fires() {
        let reasons = trigger().evaluate("", &strings(&[".github/workflows/ci.yml"]));
        assert!(reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::ProtectedFile(_))));
    }

    #[test]
    fn test_large_diff_fires_above_threshold() {
        let diff = "+x\n".repeat(201);
        let reasons = trigger().evaluate(&diff, &[]);
        assert!(reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::LargeDiff { lines: 201 })));

        let diff = "+x\n".repeat(200);
        let reasons = trigger().evaluate(&diff, &[]);
        assert!(!reasons.iter().any(|r| matches!(r, ReviewReason::LargeDiff { .. })));
    }

    #[test]
    fn test_missing_tests_fires_per_source_file() {
        let reasons = trigger().evaluate("", &strings(&["src/api/users.rs"]));
        assert!(reasons.iter().any(
            |r| matches!(r, ReviewReason::MissingTests { file } if file == "src/api/users.rs")
        ));
    }

    #[test]
    fn test_sibling_test_variants_recognized() {
        for (source, test) in [
            ("src/users.rs", "src/users_test.rs"),
            ("web/cart.ts", "web/cart.spec.ts"),
            ("web/cart.ts", "web/cart.test.ts"),
            ("pkg/util.py", "pkg/test_util.py"),
        ] {
            let reasons = trigger().evaluate("", &strings(&[source, test]));
            assert!(
                !reasons
                    .iter()
                    .any(|r| matches!(r, ReviewReason::MissingTests { .. })),
                "sibling {test} not recognized for {source}"
            );
        }
    }

    #[test]
    fn test_cross_cutting_fires_above_package_threshold() {
        let files = strings(&[
            "a/one.md",
            "b/two.md",
            "c/three.md",
            "d/four.md",
        ]);
        let reasons = trigger().evaluate("", &files);
        assert!(reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::CrossCutting { packages: 4 })));

        let files = strings(&["a/one.md", "b/two.md", "c/three.md"]);
        let reasons = trigger().evaluate("", &files);
        assert!(!reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::CrossCutting { .. })));
    }
}
