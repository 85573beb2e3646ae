//! Protected-area detection.
//!
//! A boolean predicate over paths built from three additive rule sets:
//! glob patterns (`**` spans path segments, `*` stays within one),
//! substring keywords, and exact file extensions. All matching is
//! case-insensitive; any rule hit short-circuits true.

use glob::{MatchOptions, Pattern};
use tracing::warn;

use crate::config::ProtectedConfig;

/// Built-in glob patterns always in effect.
const DEFAULT_PATTERNS: &[&str] = &[
    "**/.github/**",
    "**/.git/**",
    "**/migrations/**",
    "**/secrets/**",
    "**/*.pem",
    "**/*.key",
    "**/id_rsa*",
];

/// Built-in keywords matched as substrings of the whole path.
const DEFAULT_KEYWORDS: &[&str] = &[
    "secret",
    "credential",
    "password",
    ".env",
    "deploy",
    "infra/prod",
];

/// Built-in protected extensions.
const DEFAULT_EXTENSIONS: &[&str] = &[".pem", ".key", ".crt", ".p12", ".keystore"];

/// Case-insensitive protected-path predicate.
pub struct ProtectedAreaDetector {
    patterns: Vec<Pattern>,
    keywords: Vec<String>,
    extensions: Vec<String>,
}

impl ProtectedAreaDetector {
    /// Build a detector from the defaults plus additional configured rules.
    pub fn new(config: &ProtectedConfig) -> Self {
        let mut detector = Self {
            patterns: Vec::new(),
            keywords: Vec::new(),
            extensions: Vec::new(),
        };
        for pattern in DEFAULT_PATTERNS.iter().copied() {
            detector.add_pattern(pattern);
        }
        for pattern in &config.patterns {
            detector.add_pattern(pattern);
        }
        for keyword in DEFAULT_KEYWORDS.iter().copied().chain(config.keywords.iter().map(String::as_str)) {
            detector.keywords.push(keyword.to_lowercase());
        }
        for ext in DEFAULT_EXTENSIONS.iter().copied().chain(config.extensions.iter().map(String::as_str)) {
            let ext = ext.to_lowercase();
            if ext.starts_with('.') {
                detector.extensions.push(ext);
            } else {
                detector.extensions.push(format!(".{ext}"));
            }
        }
        detector
    }

    fn add_pattern(&mut self, raw: &str) {
        let lowered = raw.to_lowercase();
        match Pattern::new(&lowered) {
            Ok(pattern) => self.patterns.push(pattern),
            Err(err) => {
                warn!(pattern = raw, error = %err, "ignoring invalid protected-area pattern");
                return;
            }
        }
        // `**/` at the start must also cover paths with no leading
        // directories, which the matcher alone does not guarantee.
        if let Some(stripped) = lowered.strip_prefix("**/") {
            if let Ok(pattern) = Pattern::new(stripped) {
                self.patterns.push(pattern);
            }
        }
    }

    /// Whether any rule classifies this path as protected.
    pub fn is_protected(&self, path: &str) -> bool {
        let normalized = path.trim_start_matches('/').replace('\\', "/").to_lowercase();
        let basename = normalized.rsplit('/').next().unwrap_or(&normalized);

        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        if self
            .patterns
            .iter()
            .any(|p| p.matches_with(&normalized, options) || p.matches_with(basename, options))
        {
            return true;
        }
        if self.keywords.iter().any(|k| normalized.contains(k)) {
            return true;
        }
        self.extensions.iter().any(|ext| normalized.ends_with(ext))
    }
}

impl Default for ProtectedAreaDetector {
    fn default() -> Self {
        Self::new(&ProtectedConfig::default())
    }
}
