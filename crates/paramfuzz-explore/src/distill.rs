//! Top-K distillation of a trained weight table into the production pool.
//!
//! Selection keeps a bounded min-heap of size K over the full table, so a
//! sweep costs O(n log K). On equal weights, a combo already in the current
//! pool wins over a newcomer, which keeps the live pool from churning on
//! ties. Remaining ties fall back to combo order for determinism.

use crate::action::Combo;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

/// Combo to weight mapping. Used for both the full and the pool table.
pub type WeightTable = BTreeMap<Combo, f64>;

struct Ranked<'a> {
    /// Ranking key; NaN ranks as 0.0.
    weight: f64,
    /// Weight as stored in the table.
    stored: f64,
    incumbent: bool,
    combo: &'a Combo,
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then(self.incumbent.cmp(&other.incumbent))
            .then_with(|| other.combo.cmp(self.combo))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

/// Return the `k` highest-weight entries of `full`.
///
/// `current_pool` only breaks ties. With fewer than `k` entries the whole
/// table is returned. Entries keep their stored weights.
pub fn distill(full: &WeightTable, k: usize, current_pool: &WeightTable) -> WeightTable {
    if k == 0 {
        return WeightTable::new();
    }

    let mut heap: BinaryHeap<Reverse<Ranked<'_>>> = BinaryHeap::with_capacity(k + 1);
    for (combo, &weight) in full {
        let candidate = Ranked {
            weight: if weight.is_nan() { 0.0 } else { weight },
            stored: weight,
            incumbent: current_pool.contains_key(combo),
            combo,
        };

        if heap.len() < k {
            heap.push(Reverse(candidate));
            continue;
        }

        let better = heap
            .peek()
            .map_or(false, |Reverse(worst)| candidate > *worst);
        if better {
            heap.pop();
            heap.push(Reverse(candidate));
        }
    }

    heap.into_iter()
        .map(|Reverse(r)| (r.combo.clone(), r.stored))
        .collect()
}

/// Up to `n` entries of `table`, sorted by weight descending.
pub fn ranked(table: &WeightTable, n: usize) -> Vec<(Combo, f64)> {
    let mut entries: Vec<(Combo, f64)> = table.iter().map(|(c, &w)| (c.clone(), w)).collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ConfigAction, ParamValue, Scope};

    fn action(name: &str) -> ConfigAction {
        ConfigAction::new(name, &[Scope::Global], |_| ParamValue::Bool(true)).unwrap()
    }

    fn combo(names: &[&str]) -> Combo {
        names.iter().map(|n| action(n)).collect()
    }

    fn scenario_table() -> WeightTable {
        let mut table = WeightTable::new();
        table.insert(combo(&["A", "B"]), 10.0);
        table.insert(combo(&["A", "C"]), 1.0);
        table.insert(combo(&["B", "C"]), 1.0);
        table
    }

    #[test]
    fn test_distill_keeps_heaviest() {
        let top = distill(&scenario_table(), 2, &WeightTable::new());
        assert_eq!(top.len(), 2);
        assert_eq!(top.get(&combo(&["A", "B"])), Some(&10.0));
        assert!(top.contains_key(&combo(&["A", "C"])) || top.contains_key(&combo(&["B", "C"])));
    }

    #[test]
    fn test_distill_tie_prefers_incumbent() {
        let mut pool = WeightTable::new();
        pool.insert(combo(&["B", "C"]), 1.0);

        let top = distill(&scenario_table(), 2, &pool);
        assert!(top.contains_key(&combo(&["A", "B"])));
        assert!(top.contains_key(&combo(&["B", "C"])));
        assert!(!top.contains_key(&combo(&["A", "C"])));
    }

    #[test]
    fn test_distill_tie_deterministic_without_pool() {
        let first = distill(&scenario_table(), 2, &WeightTable::new());
        let second = distill(&scenario_table(), 2, &WeightTable::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_distill_smaller_than_k() {
        let top = distill(&scenario_table(), 10, &WeightTable::new());
        assert_eq!(top, scenario_table());
    }

    #[test]
    fn test_distill_zero_k() {
        assert!(distill(&scenario_table(), 0, &WeightTable::new()).is_empty());
    }

    #[test]
    fn test_distill_selected_dominate_excluded() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let actions: Vec<_> = names.iter().map(|n| action(n)).collect();
        let mut table = WeightTable::new();
        for (i, c) in Combo::pairwise(&actions).into_iter().enumerate() {
            table.insert(c, ((i * 37) % 11) as f64);
        }

        let k = 7;
        let top = distill(&table, k, &WeightTable::new());
        assert_eq!(top.len(), k);

        let min_kept = top.values().cloned().fold(f64::INFINITY, f64::min);
        for (c, w) in &table {
            if !top.contains_key(c) {
                assert!(*w <= min_kept);
            }
        }
    }

    #[test]
    fn test_ranked_sorted_descending() {
        let ranked = ranked(&scenario_table(), 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, combo(&["A", "B"]));
        assert!(ranked[0].1 >= ranked[1].1);
    }

    #[test]
    fn test_distill_keeps_stored_nan_weight() {
        let mut table = scenario_table();
        table.insert(combo(&["C", "D"]), f64::NAN);

        let all = distill(&table, 4, &WeightTable::new());
        assert_eq!(all.len(), 4);
        assert!(all[&combo(&["C", "D"])].is_nan());

        // Ranked as 0.0, so it is the first to go.
        let top = distill(&table, 3, &WeightTable::new());
        assert!(!top.contains_key(&combo(&["C", "D"])));
    }
}
