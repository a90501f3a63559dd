//! SQL-generation features and per-action feature probabilities.
//!
//! A [`Feature`] is one slot of the generator's bias vector. The controller
//! only needs to draw features, either uniformly or conditioned on the
//! chosen combo; [`FeatureSpace`] is that seam.

use crate::action::{Combo, ConfigAction};
use crate::sampler::weighted_index;
use crate::tables::SharedTables;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from feature probability tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("Feature vector for {action} has {found} slots, expected {expected}")]
    DimensionMismatch {
        action: String,
        expected: usize,
        found: usize,
    },
}

/// Index of one SQL-generation feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Feature(pub usize);

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Domain of generation features.
pub trait FeatureSpace: Send {
    /// Number of feature slots. Always at least 1.
    fn dimension(&self) -> usize;

    fn uniform_sample(&self, rng: &mut dyn RngCore) -> Feature {
        Feature(rng.gen_range(0..self.dimension().max(1)))
    }

    /// Draw a feature biased toward what worked for `combo`.
    fn sample_conditional(&self, combo: &Combo, rng: &mut dyn RngCore) -> Feature;
}

/// Feature space with no learned bias.
#[derive(Debug, Clone, Copy)]
pub struct UniformFeatureSpace {
    dimension: usize,
}

impl UniformFeatureSpace {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl FeatureSpace for UniformFeatureSpace {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn sample_conditional(&self, _combo: &Combo, rng: &mut dyn RngCore) -> Feature {
        self.uniform_sample(rng)
    }
}

/// Per-action probability vectors, all of one fixed dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureProbabilities {
    dimension: usize,
    vectors: BTreeMap<ConfigAction, Vec<f64>>,
}

impl FeatureProbabilities {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace the vector of `action`.
    ///
    /// An empty table adopts the dimension of its first vector.
    pub fn insert(&mut self, action: ConfigAction, vector: Vec<f64>) -> Result<(), FeatureError> {
        if self.vectors.is_empty() && self.dimension == 0 {
            self.dimension = vector.len();
        }
        if vector.len() != self.dimension {
            return Err(FeatureError::DimensionMismatch {
                action: action.name().to_string(),
                expected: self.dimension,
                found: vector.len(),
            });
        }
        self.vectors.insert(action, vector);
        Ok(())
    }

    pub fn get(&self, action: &ConfigAction) -> Option<&[f64]> {
        self.vectors.get(action).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConfigAction, &[f64])> {
        self.vectors.iter().map(|(a, v)| (a, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
    }

    /// Mean of the vectors of the combo's actions that have one.
    pub fn combined(&self, combo: &Combo) -> Option<Vec<f64>> {
        let mut sum = vec![0.0; self.dimension];
        let mut known = 0usize;
        for action in combo.iter() {
            if let Some(vector) = self.vectors.get(action) {
                for (slot, p) in sum.iter_mut().zip(vector) {
                    *slot += p;
                }
                known += 1;
            }
        }
        if known == 0 {
            return None;
        }
        for slot in &mut sum {
            *slot /= known as f64;
        }
        Some(sum)
    }
}

/// Running count of new edges seen per feature slot for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTally {
    counts: Vec<u64>,
}

impl FeatureTally {
    pub fn new(dimension: usize) -> Self {
        Self {
            counts: vec![0; dimension],
        }
    }

    pub fn observe(&mut self, feature: Feature, new_edges: usize) {
        if let Some(count) = self.counts.get_mut(feature.0) {
            *count = count.saturating_add(new_edges as u64);
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Normalised counts with add-one smoothing, so no slot reaches zero.
    pub fn probabilities(&self) -> Vec<f64> {
        let total: f64 = self.counts.iter().map(|&c| c as f64 + 1.0).sum();
        self.counts
            .iter()
            .map(|&c| (c as f64 + 1.0) / total)
            .collect()
    }
}

/// Feature space backed by the shared per-action probability table.
///
/// Draws read a snapshot of the table, so the lock is never held across
/// a draw.
pub struct ProbabilityFeatureSpace {
    tables: Arc<SharedTables>,
    dimension: usize,
}

impl ProbabilityFeatureSpace {
    pub fn new(tables: Arc<SharedTables>, dimension: usize) -> Self {
        Self {
            tables,
            dimension: dimension.max(1),
        }
    }
}

impl FeatureSpace for ProbabilityFeatureSpace {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn sample_conditional(&self, combo: &Combo, rng: &mut dyn RngCore) -> Feature {
        let combined = self.tables.feature_snapshot().combined(combo);
        match combined.and_then(|weights| weighted_index(&weights, rng)) {
            Some(index) if index < self.dimension => Feature(index),
            _ => self.uniform_sample(rng),
        }
    }
}
