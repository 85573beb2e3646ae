//! Structural smart-merge of known config file formats.
//!
//! Reconciles both sides of a conflicted JSON/TOML/YAML file by deep
//! union: mappings merge recursively, arrays union with order preserved,
//! and equal scalars collapse. A key carrying genuinely different scalar
//! values on the two sides makes the file unresolvable, to be handled by
//! the semantic merger or a human instead.

use tracing::debug;

use crate::domain::models::ConflictFile;

/// Outcome of a structural merge pass over a set of conflicts.
#[derive(Debug, Clone, Default)]
pub struct SmartMergeReport {
    /// Path → merged content for every file that could be reconciled.
    pub merged: Vec<(String, String)>,
    /// Paths the structural merger could not resolve.
    pub unresolved: Vec<String>,
}

/// Format-aware merger for critical config files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartMerger;

impl SmartMerger {
    pub fn new() -> Self {
        Self
    }

    /// Attempt to reconcile each conflict structurally.
    pub fn resolve(&self, conflicts: &[ConflictFile]) -> SmartMergeReport {
        let mut report = SmartMergeReport::default();
        for conflict in conflicts {
            match self.merge_one(conflict) {
                Some(content) => {
                    debug!(path = %conflict.path, "structural merge resolved conflict");
                    report.merged.push((conflict.path.clone(), content));
                }
                None => report.unresolved.push(conflict.path.clone()),
            }
        }
        report
    }

    fn merge_one(&self, conflict: &ConflictFile) -> Option<String> {
        let lower = conflict.path.to_lowercase();
        if lower.ends_with(".json") {
            self.merge_json(&conflict.ours, &conflict.theirs)
        } else if lower.ends_with(".toml") {
            self.merge_toml(&conflict.ours, &conflict.theirs)
        } else if lower.ends_with(".yaml") || lower.ends_with(".yml") {
            self.merge_yaml(&conflict.ours, &conflict.theirs)
        } else {
            None
        }
    }

    fn merge_json(&self, ours: &str, theirs: &str) -> Option<String> {
        let ours: serde_json::Value = serde_json::from_str(ours).ok()?;
        let theirs: serde_json::Value = serde_json::from_str(theirs).ok()?;
        let merged = merge_json_values(ours, theirs)?;
        serde_json::to_string_pretty(&merged)
            .ok()
            .map(|s| s + "\n")
    }

    fn merge_toml(&self, ours: &str, theirs: &str) -> Option<String> {
        let ours: toml::Value = toml::from_str(ours).ok()?;
        let theirs: toml::Value = toml::from_str(theirs).ok()?;
        let merged = merge_toml_values(ours, theirs)?;
        toml::to_string_pretty(&merged).ok()
    }

    fn merge_yaml(&self, ours: &str, theirs: &str) -> Option<String> {
        let ours: serde_yaml::Value = serde_yaml::from_str(ours).ok()?;
        let theirs: serde_yaml::Value = serde_yaml::from_str(theirs).ok()?;
        let merged = merge_yaml_values(ours, theirs)?;
        serde_yaml::to_string(&merged).ok()
    }
}

fn merge_json_values(
    ours: serde_json::Value,
    theirs: serde_json::Value,
) -> Option<serde_json::Value> {
    use serde_json::Value;
    match (ours, theirs) {
        (Value::Object(ours), Value::Object(mut theirs)) => {
            let mut merged = serde_json::Map::new();
            for (key, our_value) in ours {
                match theirs.remove(&key) {
                    Some(their_value) => {
                        merged.insert(key, merge_json_values(our_value, their_value)?);
                    }
                    None => {
                        merged.insert(key, our_value);
                    }
                }
            }
            for (key, their_value) in theirs {
                merged.insert(key, their_value);
            }
            Some(Value::Object(merged))
        }
        (Value::Array(ours), Value::Array(theirs)) => {
            let mut merged = ours;
            for item in theirs {
                if !merged.contains(&item) {
                    merged.push(item);
                }
            }
            Some(Value::Array(merged))
        }
        (ours, theirs) if ours == theirs => Some(ours),
        _ => None,
    }
}

fn merge_toml_values(ours: toml::Value, theirs: toml::Value) -> Option<toml::Value> {
    use toml::Value;
    match (ours, theirs) {
        (Value::Table(ours), Value::Table(mut theirs)) => {
            let mut merged = toml::map::Map::new();
            for (key, our_value) in ours {
                match theirs.remove(&key) {
                    Some(their_value) => {
                        merged.insert(key, merge_toml_values(our_value, their_value)?);
                    }
                    None => {
                        merged.insert(key, our_value);
                    }
                }
            }
            for (key, their_value) in theirs {
                merged.insert(key, their_value);
            }
            Some(Value::Table(merged))
        }
        (Value::Array(ours), Value::Array(theirs)) => {
            let mut merged = ours;
            for item in theirs {
                if !merged.contains(&item) {
                    merged.push(item);
                }
            }
            Some(Value::Array(merged))
        }
        (ours, theirs) if ours == theirs => Some(ours),
        _ => None,
    }
}

fn merge_yaml_values(
    ours: serde_yaml::Value,
    theirs: serde_yaml::Value,
) -> Option<serde_yaml::Value> {
    use serde_yaml::Value;
    match (ours, theirs) {
        (Value::Mapping(ours), Value::Mapping(mut theirs)) => {
            let mut merged = serde_yaml::Mapping::new();
            for (key, our_value) in ours {
                match theirs.remove(&key) {
                    Some(their_value) => {
                        merged.insert(key, merge_yaml_values(our_value, their_value)?);
                    }
                    None => {
                        merged.insert(key, our_value);
                    }
                }
            }
            for (key, their_value) in theirs {
                merged.insert(key, their_value);
            }
            Some(Value::Mapping(merged))
        }
        (Value::Sequence(ours), Value::Sequence(theirs)) => {
            let mut merged = ours;
            for item in theirs {
                if !merged.contains(&item) {
                    merged.push(item);
                }
            }
            Some(Value::Sequence(merged))
        }
        (ours, theirs) if ours == theirs => Some(ours),
        _ => None,
    }
}
