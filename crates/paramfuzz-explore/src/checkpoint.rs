//! Checkpoint save/load for resumable training campaigns.
//!
//! Saves the state needed to resume the bandit where it left off:
//! - Step counter and last-discovery step
//! - Per-combo stats and current weights
//! - Global coverage bitmap
//! - Bugs found so far
//!
//! Combos are stored as sorted action-name lists. On restore, entries
//! naming combos outside the controller's universe are dropped.

use crate::action::{Combo, ConfigAction};
use crate::controller::{ComboStats, Mode};
use crate::corpus::BugReport;
use crate::feature::Feature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors from checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration subset recorded for reference on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub seed: u64,
    pub mode: Mode,
    pub pool_size: usize,
    pub update_every: u64,
}

/// Weight and stats of one combo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboEntry {
    pub combo: Vec<String>,
    pub weight: f64,
    pub stats: ComboStats,
}

/// Serializable bug report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableBug {
    pub bug_id: u64,
    pub step: u64,
    pub combo: Vec<String>,
    pub values: Vec<(String, String)>,
    pub feature: Feature,
    pub message: String,
    pub statements: Vec<String>,
}

impl From<&BugReport> for SerializableBug {
    fn from(bug: &BugReport) -> Self {
        SerializableBug {
            bug_id: bug.bug_id,
            step: bug.step,
            combo: bug.combo.names(),
            values: bug.values.clone(),
            feature: bug.feature,
            message: bug.message.clone(),
            statements: bug.statements.clone(),
        }
    }
}

impl SerializableBug {
    /// Rebuild the report, resolving action names through `actions`.
    /// Unknown names are dropped from the combo.
    pub fn to_report(&self, actions: &BTreeMap<String, ConfigAction>) -> BugReport {
        BugReport {
            bug_id: self.bug_id,
            step: self.step,
            combo: self
                .combo
                .iter()
                .filter_map(|name| actions.get(name).cloned())
                .collect::<Combo>(),
            values: self.values.clone(),
            feature: self.feature,
            message: self.message.clone(),
            statements: self.statements.clone(),
        }
    }
}

/// Everything needed to resume a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerCheckpoint {
    pub config: CheckpointConfig,
    pub step: u64,
    pub last_discovery: u64,
    pub discoveries: u64,
    pub global_coverage: Vec<u8>,
    pub combos: Vec<ComboEntry>,
    pub bugs: Vec<SerializableBug>,
}

/// Save a checkpoint to a JSON file.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    checkpoint: &ControllerCheckpoint,
) -> Result<(), CheckpointError> {
    let json = serde_json::to_string_pretty(checkpoint)?;
    fs::write(path, json)?;
    Ok(())
}

/// Load a checkpoint from a JSON file.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<ControllerCheckpoint, CheckpointError> {
    let json = fs::read_to_string(path)?;
    let checkpoint = serde_json::from_str(&json)?;
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ParamValue, Scope};

    fn sample_checkpoint() -> ControllerCheckpoint {
        ControllerCheckpoint {
            config: CheckpointConfig {
                seed: 42,
                mode: Mode::Training,
                pool_size: 20,
                update_every: 1000,
            },
            step: 2000,
            last_discovery: 1874,
            discoveries: 31,
            global_coverage: vec![0, 1, 0, 3],
            combos: vec![ComboEntry {
                combo: vec!["autocommit".into(), "big_tables".into()],
                weight: 1.25,
                stats: ComboStats {
                    total_exec: 900,
                    new_edges: 12,
                    last_discovery: 1874,
                },
            }],
            bugs: vec![SerializableBug {
                bug_id: 0,
                step: 1500,
                combo: vec!["autocommit".into()],
                values: vec![("autocommit".into(), "OFF".into())],
                feature: Feature(2),
                message: "TLP mismatch".into(),
                statements: vec!["SELECT 1".into()],
            }],
        }
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let checkpoint = sample_checkpoint();
        let json = serde_json::to_string(&checkpoint).unwrap();
        let roundtrip: ControllerCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(checkpoint, roundtrip);
    }

    #[test]
    fn test_save_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let checkpoint = sample_checkpoint();
        save_checkpoint(&path, &checkpoint).unwrap();
        let loaded = load_checkpoint(&path).unwrap();

        assert_eq!(loaded.step, 2000);
        assert_eq!(loaded.combos, checkpoint.combos);
    }

    #[test]
    fn test_load_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_checkpoint(&path), Err(CheckpointError::Json(_))));
    }

    #[test]
    fn test_bug_to_report_drops_unknown_names() {
        let autocommit =
            ConfigAction::new("autocommit", &[Scope::Session], |_| ParamValue::Bool(true))
                .unwrap();
        let mut actions = BTreeMap::new();
        actions.insert("autocommit".to_string(), autocommit);

        let mut bug = sample_checkpoint().bugs.remove(0);
        bug.combo.push("retired_variable".into());
        let report = bug.to_report(&actions);

        assert_eq!(report.combo.names(), vec!["autocommit"]);
        assert_eq!(SerializableBug::from(&report).combo, vec!["autocommit"]);
    }
}
