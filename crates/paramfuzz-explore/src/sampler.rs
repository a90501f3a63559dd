//! Weighted sampling over a keyed weight table.
//!
//! Weights are stored in a `BTreeMap` so iteration (and therefore every
//! seeded draw) is deterministic. Draws binary-search a cumulative array
//! that is rebuilt explicitly after a batch of weight changes.

use rand::Rng;
use std::collections::BTreeMap;
use thiserror::Error;

/// Smallest weight an item can hold; keeps every item reachable.
pub const DEFAULT_WEIGHT_FLOOR: f64 = 1e-12;

/// Errors from drawing an item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("Cannot sample from an empty pool")]
    EmptyPool,

    #[error("Weights changed since the last rebuild")]
    Stale,
}

/// Mapping from item to strictly positive weight with O(log n) draws.
#[derive(Debug, Clone)]
pub struct WeightedSampler<T> {
    weights: BTreeMap<T, f64>,
    items: Vec<T>,
    cumulative: Vec<f64>,
    floor: f64,
    dirty: bool,
}

impl<T: Ord + Clone> WeightedSampler<T> {
    pub fn new() -> Self {
        Self::with_floor(DEFAULT_WEIGHT_FLOOR)
    }

    pub fn with_floor(floor: f64) -> Self {
        Self {
            weights: BTreeMap::new(),
            items: Vec::new(),
            cumulative: Vec::new(),
            floor: floor.max(f64::MIN_POSITIVE),
            dirty: false,
        }
    }

    /// Record or overwrite the weight of `item`.
    ///
    /// Weights at or below the floor (and NaN) are clamped to the floor.
    pub fn set_weight(&mut self, item: T, weight: f64) {
        let weight = if weight > self.floor {
            weight.min(f64::MAX)
        } else {
            self.floor
        };
        self.weights.insert(item, weight);
        self.dirty = true;
    }

    /// Last weight set for `item`, or 1.0 if never set.
    pub fn base_weight(&self, item: &T) -> f64 {
        self.weights.get(item).copied().unwrap_or(1.0)
    }

    pub fn weight(&self, item: &T) -> Option<f64> {
        self.weights.get(item).copied()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.weights.contains_key(item)
    }

    pub fn clear(&mut self) {
        self.weights.clear();
        self.items.clear();
        self.cumulative.clear();
        self.dirty = false;
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.weights.iter().map(|(k, &w)| (k, w))
    }

    /// Recompute the cumulative table. Call after a batch of `set_weight`.
    pub fn rebuild(&mut self) {
        self.items.clear();
        self.cumulative.clear();
        let mut running = 0.0;
        for (item, &weight) in &self.weights {
            running += weight;
            self.items.push(item.clone());
            self.cumulative.push(running);
        }
        self.dirty = false;
    }

    /// Draw an item with probability proportional to its weight.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&T, SampleError> {
        if self.weights.is_empty() {
            return Err(SampleError::EmptyPool);
        }
        if self.dirty {
            return Err(SampleError::Stale);
        }

        let total = self.cumulative[self.cumulative.len() - 1];
        let target = rng.gen::<f64>() * total;
        let index = self.cumulative.partition_point(|&c| c <= target);
        Ok(&self.items[index.min(self.items.len() - 1)])
    }
}

impl<T: Ord + Clone> Default for WeightedSampler<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw an index from a slice of non-negative weights.
///
/// Returns `None` when the slice is empty or sums to zero.
pub fn weighted_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if weights.is_empty() || total <= 0.0 || !total.is_finite() {
        return None;
    }

    let mut target = rng.gen::<f64>() * total;
    let mut last_positive = None;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        if target < w {
            return Some(i);
        }
        target -= w;
        last_positive = Some(i);
    }
    last_positive
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_sample_empty_pool() {
        let sampler: WeightedSampler<u32> = WeightedSampler::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(sampler.sample(&mut rng), Err(SampleError::EmptyPool));
    }

    #[test]
    fn test_sample_requires_rebuild() {
        let mut sampler = WeightedSampler::new();
        sampler.set_weight("a", 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(sampler.sample(&mut rng), Err(SampleError::Stale));

        sampler.rebuild();
        assert_eq!(sampler.sample(&mut rng), Ok(&"a"));
    }

    #[test]
    fn test_non_positive_weights_clamped() {
        let mut sampler = WeightedSampler::new();
        sampler.set_weight("zero", 0.0);
        sampler.set_weight("negative", -5.0);
        sampler.set_weight("nan", f64::NAN);

        for item in ["zero", "negative", "nan"] {
            assert_eq!(sampler.weight(&item), Some(DEFAULT_WEIGHT_FLOOR));
        }
    }

    #[test]
    fn test_floor_item_still_reachable() {
        let mut sampler = WeightedSampler::with_floor(0.01);
        sampler.set_weight(0u32, -1.0);
        sampler.set_weight(1u32, 0.99);
        sampler.rebuild();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let hits = (0..20_000)
            .filter(|_| *sampler.sample(&mut rng).unwrap() == 0)
            .count();
        assert!(hits > 0);
    }

    #[test]
    fn test_base_weight_defaults_to_one() {
        let mut sampler = WeightedSampler::new();
        assert_eq!(sampler.base_weight(&"x"), 1.0);
        sampler.set_weight("x", 4.5);
        assert_eq!(sampler.base_weight(&"x"), 4.5);
    }

    #[test]
    fn test_sample_proportional() {
        let mut sampler = WeightedSampler::new();
        sampler.set_weight("heavy", 9.0);
        sampler.set_weight("light", 1.0);
        sampler.rebuild();

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let heavy = (0..10_000)
            .filter(|_| *sampler.sample(&mut rng).unwrap() == "heavy")
            .count();
        assert!((8_500..9_500).contains(&heavy), "heavy drawn {} times", heavy);
    }

    #[test]
    fn test_overwrite_and_clear() {
        let mut sampler = WeightedSampler::new();
        sampler.set_weight(1u8, 2.0);
        sampler.set_weight(1u8, 3.0);
        assert_eq!(sampler.len(), 1);
        assert_eq!(sampler.total_weight(), 3.0);

        assert_eq!(sampler.weight(&1u8), Some(3.0));

        sampler.rebuild();
        sampler.clear();
        assert!(sampler.is_empty());
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert_eq!(sampler.sample(&mut rng), Err(SampleError::EmptyPool));
    }

    #[test]
    fn test_weighted_index() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert_eq!(weighted_index(&[], &mut rng), None);
        assert_eq!(weighted_index(&[0.0, 0.0], &mut rng), None);
        for _ in 0..100 {
            assert_eq!(weighted_index(&[0.0, 2.0, 0.0], &mut rng), Some(1));
        }
    }
}
