//! Retrieval result cache with stale-while-revalidate
//!
//! Keys are deterministic digests over the full request fingerprint, so
//! identical queries hit the same entry across processes. A stale hit
//! serves the cached payload immediately while at most one revalidation
//! per key runs in the background; revalidation failures never evict an
//! entry before `ttl + swr` has elapsed.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use sitevoice_core::filter::hex_prefix;
use sitevoice_core::Filters;

/// Freshness windows for a cache entry
#[derive(Debug, Clone, Copy)]
pub struct SwrPolicy {
    pub ttl: Duration,
    pub swr: Duration,
}

impl Default for SwrPolicy {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(300), swr: Duration::from_secs(60) }
    }
}

/// Result of a cache probe
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Miss,
    Fresh(Value),
    Stale(Value),
}

/// Outcome of a tenant-scoped purge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    pub cleared: usize,
    pub remaining: usize,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub approx_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / total as f64
        }
    }
}

struct CacheEntry {
    payload: Value,
    tenant_id: Uuid,
    kind: String,
    created_at: Instant,
    policy: SwrPolicy,
    approx_bytes: usize,
}

/// SWR cache for retrieval results
pub struct RetrievalCache {
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, ()>,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
}

impl RetrievalCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Probe the cache
    pub fn get(&self, key: &str) -> CacheLookup {
        let lookup = match self.entries.get(key) {
            None => CacheLookup::Miss,
            Some(entry) => {
                let age = entry.created_at.elapsed();
                if age <= entry.policy.ttl {
                    CacheLookup::Fresh(entry.payload.clone())
                } else if age <= entry.policy.ttl + entry.policy.swr {
                    CacheLookup::Stale(entry.payload.clone())
                } else {
                    CacheLookup::Miss
                }
            },
        };

        match &lookup {
            CacheLookup::Fresh(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            CacheLookup::Stale(_) => self.stale_hits.fetch_add(1, Ordering::Relaxed),
            CacheLookup::Miss => self.misses.fetch_add(1, Ordering::Relaxed),
        };

        lookup
    }

    /// Store a payload, overwriting any existing entry
    pub fn set(&self, key: &str, payload: Value, tenant_id: Uuid, kind: &str, policy: SwrPolicy) {
        let approx_bytes = payload.to_string().len();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                tenant_id,
                kind: kind.to_string(),
                created_at: Instant::now(),
                policy,
                approx_bytes,
            },
        );
    }

    /// Claim the single revalidation slot for a key
    ///
    /// Returns false when another revalidation for the key is already in
    /// flight; concurrent stale hits coalesce onto that one.
    pub fn begin_revalidation(&self, key: &str) -> bool {
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                true
            },
        }
    }

    /// Release the revalidation slot
    pub fn finish_revalidation(&self, key: &str) {
        self.in_flight.remove(key);
    }

    /// Tenant-scoped purge; `kind` and `key_pattern` narrow the sweep
    pub fn clear(
        &self,
        tenant_id: Uuid,
        kind: Option<&str>,
        key_pattern: Option<&str>,
    ) -> ClearOutcome {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if entry.tenant_id != tenant_id {
                return true;
            }
            if let Some(kind) = kind {
                if entry.kind != kind {
                    return true;
                }
            }
            if let Some(pattern) = key_pattern {
                if !key.contains(pattern) {
                    return true;
                }
            }
            false
        });
        let remaining = self.entries.len();
        ClearOutcome { cleared: before - remaining, remaining }
    }

    /// Snapshot of cache counters
    pub fn stats(&self) -> CacheStats {
        let approx_bytes = self.entries.iter().map(|e| e.approx_bytes).sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            approx_bytes,
        }
    }
}

impl Default for RetrievalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl sitevoice_core::StatsReportable for RetrievalCache {
    async fn stats_snapshot(&self) -> Value {
        let stats = self.stats();
        serde_json::json!({
            "hits": stats.hits,
            "staleHits": stats.stale_hits,
            "misses": stats.misses,
            "hitRate": stats.hit_rate(),
            "entries": stats.entries,
            "approxBytes": stats.approx_bytes,
        })
    }
}

/// Derive the cache key for a search fingerprint
///
/// The query digest covers the normalised query text rather than the
/// embedding so the cache can be probed before the embedding call; the
/// digest is identical across processes for identical input.
#[allow(clippy::too_many_arguments)]
pub fn search_cache_key(
    tenant_id: Uuid,
    locale: Option<&str>,
    model: &str,
    top_k: usize,
    query: &str,
    filters: &Filters,
    first_fusion_weight: Option<f64>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update([0x1e]);
    hasher.update(locale.unwrap_or("*").as_bytes());
    hasher.update([0x1e]);
    hasher.update(model.as_bytes());
    hasher.update([0x1e]);
    hasher.update(top_k.to_le_bytes());
    hasher.update([0x1e]);
    hasher.update(query_digest(query).as_bytes());
    hasher.update([0x1e]);
    hasher.update(filters.digest().as_bytes());
    hasher.update([0x1e]);
    if let Some(weight) = first_fusion_weight {
        hasher.update(format!("{:.6}", weight).as_bytes());
    }
    hex_prefix(hasher.finalize().as_slice(), 24)
}

/// Deterministic digest of the query text (case/whitespace normalised)
pub fn query_digest(query: &str) -> String {
    let normalised: String = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalised.as_bytes());
    hex_prefix(hasher.finalize().as_slice(), 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_then_stale_then_miss() {
        let cache = RetrievalCache::new();
        let tenant = Uuid::new_v4();
        let policy =
            SwrPolicy { ttl: Duration::from_millis(40), swr: Duration::from_millis(60) };
        cache.set("k", json!({"v": 1}), tenant, "search", policy);

        assert!(matches!(cache.get("k"), CacheLookup::Fresh(_)));

        std::thread::sleep(Duration::from_millis(55));
        assert!(matches!(cache.get("k"), CacheLookup::Stale(_)));

        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(cache.get("k"), CacheLookup::Miss));
    }

    #[test]
    fn test_revalidation_coalesces() {
        let cache = RetrievalCache::new();
        assert!(cache.begin_revalidation("k"));
        assert!(!cache.begin_revalidation("k"));
        cache.finish_revalidation("k");
        assert!(cache.begin_revalidation("k"));
    }

    #[test]
    fn test_clear_is_tenant_scoped() {
        let cache = RetrievalCache::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        cache.set("a1", json!(1), tenant_a, "search", SwrPolicy::default());
        cache.set("a2", json!(2), tenant_a, "status", SwrPolicy::default());
        cache.set("b1", json!(3), tenant_b, "search", SwrPolicy::default());

        let outcome = cache.clear(tenant_a, Some("search"), None);
        assert_eq!(outcome, ClearOutcome { cleared: 1, remaining: 2 });

        let outcome = cache.clear(tenant_a, None, None);
        assert_eq!(outcome, ClearOutcome { cleared: 1, remaining: 1 });

        assert!(matches!(cache.get("b1"), CacheLookup::Fresh(_)));
    }

    #[test]
    fn test_cache_key_deterministic() {
        let tenant = Uuid::new_v4();
        let filters = Filters::new();
        let a = search_cache_key(tenant, Some("en-US"), "m", 10, "Cats  and dogs", &filters, Some(0.6));
        let b = search_cache_key(tenant, Some("en-US"), "m", 10, "cats and dogs", &filters, Some(0.6));
        assert_eq!(a, b);

        let c = search_cache_key(tenant, Some("en-US"), "m", 11, "cats and dogs", &filters, Some(0.6));
        assert_ne!(a, c);

        let d = search_cache_key(tenant, Some("de-DE"), "m", 10, "cats and dogs", &filters, Some(0.6));
        assert_ne!(a, d);
    }

    #[test]
    fn test_stats_track_probes() {
        let cache = RetrievalCache::new();
        let tenant = Uuid::new_v4();
        cache.set("k", json!(1), tenant, "search", SwrPolicy::default());
        let _ = cache.get("k");
        let _ = cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.hit_rate() > 0.4 && stats.hit_rate() < 0.6);
    }
}
