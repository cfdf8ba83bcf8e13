//! Reciprocal Rank Fusion
//!
//! Combines ranked lists from heterogeneous strategies into a single
//! ranking. `rrf(item) = sum over lists of w_i / (k + rank_i)`; items
//! missing from a list contribute nothing. The fused order is
//! deterministic for any permutation of the input lists.

use std::collections::BTreeMap;
use std::collections::HashMap;

use uuid::Uuid;

/// Default RRF k constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One ranked entry of a strategy's output
#[derive(Debug, Clone)]
pub struct RankedItem {
    pub id: Uuid,
    /// The strategy's own score, carried through for diagnostics
    pub score: f32,
}

/// A single strategy's ranking
#[derive(Debug, Clone)]
pub struct RankedList {
    /// Strategy name, e.g. "vector"
    pub system: String,
    /// Fusion weight for this list
    pub weight: f64,
    /// Items in rank order, best first
    pub items: Vec<RankedItem>,
}

impl RankedList {
    pub fn new(system: impl Into<String>, items: Vec<RankedItem>) -> Self {
        Self { system: system.into(), weight: 1.0, items }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Fusion options
#[derive(Debug, Clone)]
pub struct FuseOptions {
    /// RRF k constant
    pub k_rrf: f64,
    /// Drop items appearing in fewer than this many lists
    pub min_consensus: Option<usize>,
    /// Truncate the fused list
    pub max_results: Option<usize>,
    /// Drop items below this fused score
    pub min_score: Option<f64>,
}

impl Default for FuseOptions {
    fn default() -> Self {
        Self {
            k_rrf: DEFAULT_RRF_K,
            min_consensus: None,
            max_results: None,
            min_score: None,
        }
    }
}

/// A fused item with per-system diagnostics
#[derive(Debug, Clone)]
pub struct FusedItem {
    pub id: Uuid,
    /// Weighted RRF score
    pub rrf_score: f64,
    /// Raw score per contributing system
    pub system_scores: BTreeMap<String, f32>,
    /// 1-based rank per contributing system
    pub system_ranks: BTreeMap<String, usize>,
    /// Number of lists that contained the item
    pub appears_in_systems: usize,
    /// Best (lowest) rank across systems
    pub best_rank: usize,
}

/// Fuse ranked lists into a single ranking
pub fn fuse(lists: &[RankedList], options: &FuseOptions) -> Vec<FusedItem> {
    let mut fused: HashMap<Uuid, FusedItem> = HashMap::new();

    for list in lists {
        for (position, item) in list.items.iter().enumerate() {
            let rank = position + 1;
            let contribution = list.weight / (options.k_rrf + rank as f64);

            let entry = fused.entry(item.id).or_insert_with(|| FusedItem {
                id: item.id,
                rrf_score: 0.0,
                system_scores: BTreeMap::new(),
                system_ranks: BTreeMap::new(),
                appears_in_systems: 0,
                best_rank: usize::MAX,
            });

            entry.rrf_score += contribution;
            entry.system_scores.insert(list.system.clone(), item.score);
            entry.system_ranks.insert(list.system.clone(), rank);
            entry.appears_in_systems += 1;
            entry.best_rank = entry.best_rank.min(rank);
        }
    }

    let mut results: Vec<FusedItem> = fused.into_values().collect();

    if let Some(min_consensus) = options.min_consensus {
        results.retain(|item| item.appears_in_systems >= min_consensus);
    }
    if let Some(min_score) = options.min_score {
        results.retain(|item| item.rrf_score >= min_score);
    }

    // Primary: fused score. Secondary: consensus, then best single-system
    // rank. Final id tiebreak keeps the order stable across runs.
    results.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.appears_in_systems.cmp(&a.appears_in_systems))
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.id.cmp(&b.id))
    });

    if let Some(max_results) = options.max_results {
        results.truncate(max_results);
    }

    results
}
