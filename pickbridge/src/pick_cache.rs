//! weighted/ordered pick tables
//!
//! a cache is built once from `(index, weight)` pairs and is read-only
//! afterwards, so it can be shared across worker threads freely. every pick
//! returns an index from the registered sequence, or `INVALID_PICK` when the
//! cache is empty or the cursor is out of range.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

pub const INVALID_PICK: i32 = -1;

/// deterministic orderings for index-based picking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexPickMode {
    #[default]
    Ascending,
    Descending,
    WeightAscending,
    WeightDescending,
}

#[derive(Debug, Clone, Default)]
pub struct WeightedPickCache {
    indices: Vec<i32>,
    // weight + 1 per entry, registration order
    weights: Vec<i64>,
    // running sum of `weights`, registration order
    weights_cumulative: Vec<i64>,
    // positions sorted by weight, lowest first (stable)
    order: Vec<usize>,
    weight_sum: i64,
}

fn rng_for(seed: i32) -> StdRng {
    StdRng::seed_from_u64(u64::from(seed as u32))
}

impl WeightedPickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// build a compiled cache where entry `i` has weight `weights[i]`
    pub fn build_from_weights(weights: &[i32]) -> Self {
        let mut cache = Self::new();
        cache.reserve(weights.len());
        for (i, weight) in weights.iter().enumerate() {
            cache.register(i as i32, *weight);
        }
        cache.compile();
        cache
    }

    /// build a compiled cache from `(index, weight)` pairs
    pub fn from_entries(entries: impl IntoIterator<Item = (i32, i32)>) -> Self {
        let mut cache = Self::new();
        for (index, weight) in entries {
            cache.register(index, weight);
        }
        cache.compile();
        cache
    }

    pub fn reserve(&mut self, additional: usize) {
        self.indices.reserve(additional);
        self.weights.reserve(additional);
    }

    /// add an entry. takes effect on the next `compile`.
    pub fn register(&mut self, index: i32, weight: i32) {
        self.indices.push(index);
        // +1 so a zero weight can still be picked
        self.weights.push(i64::from(weight.max(0)) + 1);
    }

    pub fn compile(&mut self) {
        self.indices.shrink_to_fit();
        self.weights.shrink_to_fit();

        let mut order: Vec<usize> = (0..self.weights.len()).collect();
        order.sort_by_key(|&i| self.weights[i]);
        self.order = order;

        let mut sum = 0i64;
        self.weights_cumulative = self
            .weights
            .iter()
            .map(|weight| {
                sum += weight;
                sum
            })
            .collect();
        self.weight_sum = sum;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn weight_sum(&self) -> i64 {
        self.weight_sum
    }

    /// registered indices, in registration order
    pub fn indices(&self) -> &[i32] {
        &self.indices
    }

    fn position(&self, cursor: i32) -> Option<usize> {
        usize::try_from(cursor).ok().filter(|&i| i < self.len())
    }

    pub fn pick(&self, cursor: i32, mode: IndexPickMode) -> i32 {
        match mode {
            IndexPickMode::Ascending => self.pick_ascending(cursor),
            IndexPickMode::Descending => self.pick_descending(cursor),
            IndexPickMode::WeightAscending => self.pick_weight_ascending(cursor),
            IndexPickMode::WeightDescending => self.pick_weight_descending(cursor),
        }
    }

    pub fn pick_ascending(&self, cursor: i32) -> i32 {
        self.position(cursor)
            .map_or(INVALID_PICK, |i| self.indices[i])
    }

    pub fn pick_descending(&self, cursor: i32) -> i32 {
        self.position(cursor)
            .map_or(INVALID_PICK, |i| self.indices[self.len() - 1 - i])
    }

    pub fn pick_weight_ascending(&self, cursor: i32) -> i32 {
        self.position(cursor)
            .map_or(INVALID_PICK, |i| self.indices[self.order[i]])
    }

    pub fn pick_weight_descending(&self, cursor: i32) -> i32 {
        self.position(cursor)
            .map_or(INVALID_PICK, |i| self.indices[self.order[self.len() - 1 - i]])
    }

    /// uniform pick, weights ignored
    pub fn pick_random(&self, seed: i32) -> i32 {
        if self.is_empty() {
            return INVALID_PICK;
        }
        let pick = rng_for(seed).gen_range(0..self.len());
        self.indices[pick]
    }

    /// pick proportionally to `weight + 1`
    pub fn pick_random_weighted(&self, seed: i32) -> i32 {
        if self.is_empty() {
            return INVALID_PICK;
        }
        let threshold = rng_for(seed).gen_range(1..=self.weight_sum);
        let pick = self
            .weights_cumulative
            .partition_point(|&cumulative| cumulative < threshold);
        self.indices[pick.min(self.len() - 1)]
    }
}

/// per-entry sub-selection cache (e.g. material variants)
pub type MicroCache = WeightedPickCache;

/// a named group of entries
#[derive(Debug, Clone, Default)]
pub struct Category {
    pub name: String,
    cache: WeightedPickCache,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cache: WeightedPickCache::new(),
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        self.cache.reserve(additional);
    }

    pub fn register_entry(&mut self, index: i32, weight: i32) {
        self.cache.register(index, weight);
    }

    pub fn compile(&mut self) {
        self.cache.compile();
    }
}

impl Deref for Category {
    type Target = WeightedPickCache;

    fn deref(&self) -> &WeightedPickCache {
        &self.cache
    }
}

/// main category over every valid entry of a collection, plus one category per
/// entry category name
#[derive(Debug, Clone, Default)]
pub struct Cache {
    pub main: Category,
    pub categories: FxHashMap<String, Category>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
    }

    pub fn register_entry(&mut self, index: i32, weight: i32, category: &str) {
        self.main.register_entry(index, weight);
        self.categories
            .entry(category.to_string())
            .or_insert_with(|| Category::new(category))
            .register_entry(index, weight);
    }

    pub fn compile(&mut self) {
        self.main.compile();
        for category in self.categories.values_mut() {
            category.compile();
        }
        log::trace!(
            "compiled pick cache: {} entries, {} categories",
            self.main.len(),
            self.categories.len()
        );
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERED_MODES: [IndexPickMode; 4] = [
        IndexPickMode::Ascending,
        IndexPickMode::Descending,
        IndexPickMode::WeightAscending,
        IndexPickMode::WeightDescending,
    ];

    #[test]
    fn test_len_matches_input() {
        for n in 0..20 {
            let weights: Vec<i32> = (0..n).collect();
            let cache = WeightedPickCache::build_from_weights(&weights);
            assert_eq!(cache.len(), n as usize);
            assert_eq!(cache.is_empty(), n == 0);
        }
    }

    #[test]
    fn test_empty_cache_returns_invalid() {
        let cache = WeightedPickCache::build_from_weights(&[]);
        for mode in ORDERED_MODES {
            assert_eq!(cache.pick(0, mode), INVALID_PICK);
        }
        assert_eq!(cache.pick_random(42), INVALID_PICK);
        assert_eq!(cache.pick_random_weighted(42), INVALID_PICK);
    }

    #[test]
    fn test_single_entry() {
        let cache = WeightedPickCache::build_from_weights(&[7]);
        for mode in ORDERED_MODES {
            assert_eq!(cache.pick(0, mode), 0);
            assert_eq!(cache.pick(1, mode), INVALID_PICK);
            assert_eq!(cache.pick(-1, mode), INVALID_PICK);
        }
        assert_eq!(cache.pick_random(3), 0);
        assert_eq!(cache.pick_random_weighted(3), 0);
    }

    #[test]
    fn test_ascending_descending() {
        let cache = WeightedPickCache::build_from_weights(&[10, 20, 30, 40, 50]);
        assert_eq!(cache.pick_ascending(2), 2);
        assert_eq!(cache.pick_descending(0), 4);

        for i in 0..5 {
            assert_eq!(cache.pick_ascending(i), i);
            assert_eq!(cache.pick_descending(i), 4 - i);
        }
        assert_eq!(cache.pick_ascending(5), INVALID_PICK);
        assert_eq!(cache.pick_descending(5), INVALID_PICK);
    }

    #[test]
    fn test_weight_order() {
        let cache = WeightedPickCache::build_from_weights(&[50, 10, 30, 20, 40]);
        assert_eq!(cache.pick_weight_ascending(0), 1);
        assert_eq!(cache.pick_weight_ascending(4), 0);

        let ascending: Vec<i32> = (0..5).map(|i| cache.pick_weight_ascending(i)).collect();
        assert_eq!(ascending, vec![1, 3, 2, 4, 0]);

        let descending: Vec<i32> = (0..5)
            .map(|i| cache.pick(i, IndexPickMode::WeightDescending))
            .collect();
        assert_eq!(descending, vec![0, 4, 2, 3, 1]);
    }

    #[test]
    fn test_weight_order_ties_are_stable() {
        let cache = WeightedPickCache::build_from_weights(&[5, 1, 5, 1]);
        let ascending: Vec<i32> = (0..4).map(|i| cache.pick_weight_ascending(i)).collect();
        assert_eq!(ascending, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_weight_sum_includes_bias() {
        let cache = WeightedPickCache::build_from_weights(&[0, 0, 3]);
        assert_eq!(cache.weight_sum(), 6);
    }

    #[test]
    fn test_picks_are_deterministic() {
        let cache = WeightedPickCache::build_from_weights(&[3, 1, 4, 1, 5, 9, 2, 6]);
        for seed in 0..100 {
            assert_eq!(cache.pick_random(seed), cache.pick_random(seed));
            assert_eq!(cache.pick_random_weighted(seed), cache.pick_random_weighted(seed));
        }
    }

    #[test]
    fn test_weighted_random_distribution() {
        let weights = [100, 200, 300, 400];
        let cache = WeightedPickCache::build_from_weights(&weights);
        let trials = 20_000;

        let mut counts = [0usize; 4];
        for seed in 0..trials {
            let pick = cache.pick_random_weighted(seed);
            counts[pick as usize] += 1;
        }

        let total_weight: i32 = weights.iter().map(|w| w + 1).sum();
        for (i, weight) in weights.iter().enumerate() {
            let expected = trials as f64 * f64::from(weight + 1) / f64::from(total_weight);
            let error = (counts[i] as f64 - expected).abs() / expected;
            assert!(
                error < 0.25,
                "entry {} picked {} times, expected ~{:.0}",
                i,
                counts[i],
                expected
            );
        }

        for i in 0..3 {
            assert!(counts[3] > counts[i]);
        }
    }

    #[test]
    fn test_zero_weight_can_be_picked() {
        let cache = WeightedPickCache::build_from_weights(&[0, 0]);
        let picked_first = (0..1000).any(|seed| cache.pick_random_weighted(seed) == 0);
        let picked_second = (0..1000).any(|seed| cache.pick_random_weighted(seed) == 1);
        assert!(picked_first && picked_second);
    }

    #[test]
    fn test_random_ignores_weights() {
        let weights = [1, 1000, 5, 50000];
        let cache = WeightedPickCache::build_from_weights(&weights);
        let trials = 10_000;

        let mut counts = [0usize; 4];
        for seed in 0..trials {
            counts[cache.pick_random(seed) as usize] += 1;
        }

        let expected = trials as f64 / weights.len() as f64;
        for count in counts {
            assert!((count as f64 - expected).abs() < expected * 0.4);
        }
    }

    #[test]
    fn test_registered_indices_are_returned() {
        // entries 0 and 2 were filtered out upstream
        let cache = WeightedPickCache::from_entries([(1, 10), (3, 5), (4, 20)]);
        assert_eq!(cache.pick_ascending(0), 1);
        assert_eq!(cache.pick_descending(0), 4);
        assert_eq!(cache.pick_weight_ascending(0), 3);
        for seed in 0..200 {
            assert!([1, 3, 4].contains(&cache.pick_random_weighted(seed)));
        }
    }

    #[test]
    fn test_cache_categories() {
        let mut cache = Cache::new();
        assert!(cache.is_empty());

        cache.register_entry(0, 1, "rocks");
        cache.register_entry(1, 1, "trees");
        cache.register_entry(2, 1, "rocks");
        cache.compile();

        assert!(!cache.is_empty());
        assert_eq!(cache.main.len(), 3);

        let rocks = cache.category("rocks").unwrap();
        assert_eq!(rocks.name, "rocks");
        assert_eq!(rocks.indices(), &[0, 2]);
        assert_eq!(rocks.pick_descending(0), 2);
        assert!(cache.category("water").is_none());
    }
}
