//! Line-oriented text files for trained tables.
//!
//! Two files per campaign prefix:
//!
//! ```text
//! {prefix}_feature_weights.txt   actionName:p1,p2,...
//! {prefix}_config_weights.txt    action1,action2,...:weight
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Malformed lines
//! are skipped with a warning. A feature file whose entry count differs
//! from the registered action count is rejected as a whole.

use crate::action::{ActionSet, Combo, ConfigAction};
use crate::distill::WeightTable;
use crate::feature::{FeatureError, FeatureProbabilities};
use log::{info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading or saving persisted tables.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Loaded {found} entries, but {expected} actions are registered")]
    ConfigurationMismatch { expected: usize, found: usize },

    #[error("{0}")]
    Feature(#[from] FeatureError),
}

/// File locations for one campaign prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignFiles {
    prefix: String,
}

impl CampaignFiles {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn feature_weights(&self) -> PathBuf {
        PathBuf::from(format!("{}_feature_weights.txt", self.prefix))
    }

    pub fn config_weights(&self) -> PathBuf {
        PathBuf::from(format!("{}_config_weights.txt", self.prefix))
    }
}

/// Meaningful lines of a file: trimmed, non-blank, not comments.
fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Split `key:value` on its only colon.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Some((key.trim(), value.trim())),
        _ => None,
    }
}

pub fn format_feature_probabilities(table: &FeatureProbabilities) -> String {
    let mut output = String::new();
    for (action, vector) in table.iter() {
        let probs: Vec<String> = vector.iter().map(|p| p.to_string()).collect();
        output.push_str(&format!("{}:{}\n", action.name(), probs.join(",")));
    }
    output
}

/// Parse a feature-probability file against the registered `actions`.
pub fn parse_feature_probabilities(
    text: &str,
    actions: &ActionSet,
) -> Result<FeatureProbabilities, PersistError> {
    let mut parsed: Vec<(ConfigAction, Vec<f64>)> = Vec::new();
    // Every named entry, known or not, counts against the registered actions.
    let mut entries: BTreeSet<&str> = BTreeSet::new();
    for line in content_lines(text) {
        let Some((name, probs)) = split_entry(line) else {
            warn!("Skipping malformed feature line: {}", line);
            continue;
        };
        entries.insert(name);
        let Some(action) = actions.get(name) else {
            warn!("Skipping feature line for unknown action {}", name);
            continue;
        };
        let vector: Result<Vec<f64>, _> = probs.split(',').map(|p| p.trim().parse()).collect();
        match vector {
            Ok(vector) => {
                parsed.retain(|(a, _)| a != action);
                parsed.push((action.clone(), vector));
            }
            Err(e) => warn!("Skipping feature line with bad probability ({}): {}", e, line),
        }
    }

    if entries.len() != actions.len() {
        return Err(PersistError::ConfigurationMismatch {
            expected: actions.len(),
            found: entries.len(),
        });
    }
    if parsed.len() != actions.len() {
        return Err(PersistError::ConfigurationMismatch {
            expected: actions.len(),
            found: parsed.len(),
        });
    }

    let mut table = FeatureProbabilities::default();
    for (action, vector) in parsed {
        table.insert(action, vector)?;
    }
    Ok(table)
}

pub fn save_feature_probabilities(
    path: impl AsRef<Path>,
    table: &FeatureProbabilities,
) -> Result<(), PersistError> {
    fs::write(path.as_ref(), format_feature_probabilities(table))?;
    info!(
        "Saved {} feature vectors to {}",
        table.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn load_feature_probabilities(
    path: impl AsRef<Path>,
    actions: &ActionSet,
) -> Result<FeatureProbabilities, PersistError> {
    let text = fs::read_to_string(path.as_ref())?;
    let table = parse_feature_probabilities(&text, actions)?;
    info!(
        "Loaded {} feature vectors from {}",
        table.len(),
        path.as_ref().display()
    );
    Ok(table)
}

pub fn format_combo_weights(table: &WeightTable) -> String {
    let mut output = String::new();
    for (combo, weight) in table {
        output.push_str(&format!("{}:{}\n", combo, weight));
    }
    output
}

/// Parse a combo-weight file. Unknown action names are dropped from their
/// combo; a line left with no known action is skipped.
pub fn parse_combo_weights(text: &str, actions: &ActionSet) -> WeightTable {
    let mut table = WeightTable::new();
    for line in content_lines(text) {
        let Some((names, weight)) = split_entry(line) else {
            warn!("Skipping malformed weight line: {}", line);
            continue;
        };
        let weight: f64 = match weight.parse() {
            Ok(w) => w,
            Err(e) => {
                warn!("Skipping weight line with bad weight ({}): {}", e, line);
                continue;
            }
        };

        let combo: Combo = names
            .split(',')
            .filter_map(|name| actions.get(name.trim()).cloned())
            .collect();
        if combo.is_empty() {
            warn!("Skipping weight line with no known action: {}", line);
            continue;
        }
        table.insert(combo, weight);
    }
    table
}

pub fn save_combo_weights(path: impl AsRef<Path>, table: &WeightTable) -> Result<(), PersistError> {
    fs::write(path.as_ref(), format_combo_weights(table))?;
    info!(
        "Saved {} combo weights to {}",
        table.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn load_combo_weights(
    path: impl AsRef<Path>,
    actions: &ActionSet,
) -> Result<WeightTable, PersistError> {
    let text = fs::read_to_string(path.as_ref())?;
    let table = parse_combo_weights(&text, actions);
    info!(
        "Loaded {} combo weights from {}",
        table.len(),
        path.as_ref().display()
    );
    Ok(table)
}
