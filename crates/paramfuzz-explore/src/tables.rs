//! Shared aggregation point for cross-campaign learning.
//!
//! One [`SharedTables`] is created per process and handed to every
//! controller as an `Arc`. Writers take the relevant lock one at a time;
//! readers take snapshot copies so no lock is held across a draw.
//!
//! The production pool is an `Arc<WeightTable>` swapped in one store, so a
//! reader sees either the old or the new pool, never a partial one.

use crate::action::{ActionSet, Combo, ConfigAction};
use crate::distill::{distill, ranked, WeightTable};
use crate::feature::{FeatureError, FeatureProbabilities};
use crate::persist::{self, CampaignFiles, PersistError};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub struct SharedTables {
    full: RwLock<WeightTable>,
    pool: RwLock<Arc<WeightTable>>,
    /// Serialises distillation so two campaigns never interleave swaps.
    distill_lock: Mutex<()>,
    features: RwLock<FeatureProbabilities>,
}

impl SharedTables {
    /// Empty tables; feature vectors must have `feature_dimension` slots.
    pub fn new(feature_dimension: usize) -> Self {
        Self {
            full: RwLock::new(WeightTable::new()),
            pool: RwLock::new(Arc::new(WeightTable::new())),
            distill_lock: Mutex::new(()),
            features: RwLock::new(FeatureProbabilities::new(feature_dimension)),
        }
    }

    pub fn full_snapshot(&self) -> WeightTable {
        self.full.read().clone()
    }

    pub fn full_weight(&self, combo: &Combo) -> Option<f64> {
        self.full.read().get(combo).copied()
    }

    pub fn full_len(&self) -> usize {
        self.full.read().len()
    }

    /// Add combos not yet known at weight 1.0. Existing weights are kept.
    pub fn seed_full<'a>(&self, combos: impl IntoIterator<Item = &'a Combo>) {
        let mut full = self.full.write();
        for combo in combos {
            full.entry(combo.clone()).or_insert(1.0);
        }
    }

    pub fn replace_full(&self, table: WeightTable) {
        *self.full.write() = table;
    }

    /// Overwrite the weights of the given combos.
    pub fn publish_weights(&self, weights: impl IntoIterator<Item = (Combo, f64)>) {
        let mut full = self.full.write();
        for (combo, weight) in weights {
            full.insert(combo, weight);
        }
    }

    /// Current production pool.
    pub fn pool(&self) -> Arc<WeightTable> {
        Arc::clone(&self.pool.read())
    }

    /// Distil the full table into a new pool of at most `k` entries and
    /// swap it in. Returns the new pool.
    pub fn redistill(&self, k: usize) -> Arc<WeightTable> {
        let _guard = self.distill_lock.lock();
        let current = self.pool();
        let next = {
            let full = self.full.read();
            Arc::new(distill(&full, k, &current))
        };
        *self.pool.write() = Arc::clone(&next);
        debug!("Distilled pool of {} from {} combos", next.len(), self.full_len());
        next
    }

    /// Up to `n` pool entries, heaviest first.
    pub fn top_pool(&self, n: usize) -> Vec<(Combo, f64)> {
        ranked(&self.pool(), n)
    }

    pub fn feature_snapshot(&self) -> FeatureProbabilities {
        self.features.read().clone()
    }

    /// Store trained vectors. Rejects the whole batch if any vector has the
    /// wrong dimension.
    pub fn publish_feature_vectors(
        &self,
        vectors: impl IntoIterator<Item = (ConfigAction, Vec<f64>)>,
    ) -> Result<(), FeatureError> {
        let mut features = self.features.write();
        let mut staged = features.clone();
        for (action, vector) in vectors {
            staged.insert(action, vector)?;
        }
        *features = staged;
        Ok(())
    }

    /// Load both persisted tables. Failures are logged and leave the
    /// corresponding table empty.
    pub fn load(&self, files: &CampaignFiles, actions: &ActionSet) {
        match persist::load_combo_weights(files.config_weights(), actions) {
            Ok(table) => self.replace_full(table),
            Err(e) => {
                warn!("Combo weights not loaded, starting from uniform: {}", e);
                self.replace_full(WeightTable::new());
            }
        }

        let dimension = self.features.read().dimension();
        let loaded = persist::load_feature_probabilities(files.feature_weights(), actions)
            .and_then(|table| {
                if dimension != 0 && table.dimension() != dimension {
                    return Err(PersistError::Feature(FeatureError::DimensionMismatch {
                        action: "*".to_string(),
                        expected: dimension,
                        found: table.dimension(),
                    }));
                }
                Ok(table)
            });
        match loaded {
            Ok(table) => *self.features.write() = table,
            Err(e) => {
                warn!("Feature probabilities rejected: {}", e);
                self.features.write().clear();
            }
        }
    }

    /// Save both tables. Errors are returned; callers usually just log them.
    pub fn save(&self, files: &CampaignFiles) -> Result<(), PersistError> {
        persist::save_combo_weights(files.config_weights(), &self.full_snapshot())?;
        persist::save_feature_probabilities(files.feature_weights(), &self.feature_snapshot())?;
        info!("Saved trained tables with prefix {:?}", files);
        Ok(())
    }
}

impl Default for SharedTables {
    fn default() -> Self {
        Self::new(0)
    }
}
