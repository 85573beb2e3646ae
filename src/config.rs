//! Configuration management for the orchestrator core.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },
}

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
    pub collision: CollisionConfig,
    pub merge: MergeConfig,
    pub budget: BudgetConfig,
    pub review: ReviewConfig,
    pub protected: ProtectedConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_agents == 0 {
            return Err(ConfigError::ValidationError {
                field: "scheduler.max_agents".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.collision.max_agents_per_top_level == 0 {
            return Err(ConfigError::ValidationError {
                field: "collision.max_agents_per_top_level".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.merge.max_retries == 0 {
            return Err(ConfigError::ValidationError {
                field: "merge.max_retries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Run-loop and admission tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum concurrently running agents.
    pub max_agents: usize,
    /// Idle wait between scheduling ticks (milliseconds).
    pub poll_interval_ms: u64,
    /// Delay between successive spawns within one tick (milliseconds).
    pub spawn_stagger_ms: u64,
    /// Greenfield mode: merges target `main`, root-touching is serialized.
    pub greenfield: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_agents: 4,
            poll_interval_ms: 100,
            spawn_stagger_ms: 2000,
            greenfield: false,
        }
    }
}

/// Collision checker policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Touch count beyond which a file becomes a hotspot.
    pub hotspot_threshold: u32,
    /// Maximum concurrent agents per top-level directory.
    pub max_agents_per_top_level: usize,
    /// Description keywords that imply root-level restructuring.
    pub root_keywords: Vec<String>,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            hotspot_threshold: 3,
            max_agents_per_top_level: 2,
            root_keywords: vec![
                "restructure".to_string(),
                "reorganize".to_string(),
                "scaffold".to_string(),
                "bootstrap".to_string(),
                "project setup".to_string(),
                "initial setup".to_string(),
                "monorepo".to_string(),
                "rename the project".to_string(),
            ],
        }
    }
}

/// Merge pipeline tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Semantic merge attempts before escalating.
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts (seconds).
    pub backoff_base_secs: u64,
    /// Per-attempt semantic merge timeout (seconds).
    pub semantic_timeout_secs: u64,
    /// Native merge attempts in greenfield mode (driver rebases between).
    pub greenfield_merge_attempts: u32,
    /// Build/test command run after fallback merges; empty disables
    /// verification. First element is the program, the rest are arguments.
    pub verify_command: Vec<String>,
    /// Verification timeout (seconds).
    pub verify_timeout_secs: u64,
    /// Capacity of the merge request queue.
    pub queue_capacity: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_secs: 2,
            semantic_timeout_secs: 300,
            greenfield_merge_attempts: 3,
            verify_command: Vec::new(),
            verify_timeout_secs: 120,
            queue_capacity: 64,
        }
    }
}

/// Token/cost budget configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Budget in cost units; zero or negative means unlimited.
    pub budget: f64,
    /// Fraction of budget at which the state becomes Warning.
    pub warning_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            budget: 0.0,
            warning_threshold: 0.80,
        }
    }
}

/// Second-review trigger thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Diff line count beyond which a second review fires.
    pub large_diff_threshold: usize,
    /// Number of packages a diff may span before a review fires.
    pub cross_cutting_threshold: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            large_diff_threshold: 200,
            cross_cutting_threshold: 3,
        }
    }
}

/// Additional protected-area rules, appended to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProtectedConfig {
    pub patterns: Vec<String>,
    pub keywords: Vec<String>,
    pub extensions: Vec<String>,
}

/// Session branch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix for session branch names.
    pub branch_prefix: String,
    /// Prefix for per-agent branch names.
    pub agent_branch_prefix: String,
    /// Event channel capacity. Values below 1000 are raised to 1000.
    pub event_capacity: usize,
    /// Repository working directory the merge pipeline operates in.
    pub workdir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "session".to_string(),
            agent_branch_prefix: "agent".to_string(),
            event_capacity: 1000,
            workdir: ".".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Emit JSON-formatted logs.
    pub json: bool,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.scheduler.max_agents, 4);
        assert_eq!(config.scheduler.poll_interval_ms, 100);
        assert_eq!(config.scheduler.spawn_stagger_ms, 2000);
        assert_eq!(config.collision.hotspot_threshold, 3);
        assert_eq!(config.collision.max_agents_per_top_level, 2);
        assert_eq!(config.merge.max_retries, 3);
        assert_eq!(config.merge.backoff_base_secs, 2);
        assert_eq!(config.merge.semantic_timeout_secs, 300);
        assert_eq!(config.merge.verify_timeout_secs, 120);
        assert!((config.budget.warning_threshold - 0.80).abs() < f64::EPSILON);
        assert_eq!(config.review.large_diff_threshold, 200);
        assert_eq!(config.review.cross_cutting_threshold, 3);
    }

    #[test]
    fn test_parse_partial_toml() {
        let raw = r#"
            [scheduler]
            max_agents = 8
            greenfield = true

            [merge]
            verify_command = ["cargo", "check"]
        "#;
        let config: OrchestratorConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.scheduler.max_agents, 8);
        assert!(config.scheduler.greenfield);
        assert_eq!(config.merge.verify_command, vec!["cargo", "check"]);
        // Unspecified sections keep defaults.
        assert_eq!(config.collision.hotspot_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_zero_agents() {
        let mut config = OrchestratorConfig::default();
        config.scheduler.max_agents = 0;
        assert!(config.validate().is_err());
    }
}
