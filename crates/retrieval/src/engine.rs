//! Hybrid search orchestration
//!
//! Fans one search request out to the configured strategies in parallel,
//! fuses the rankings with RRF, post-processes snippets and serves the
//! whole thing through the SWR cache. Strategy failures are recovered
//! locally and reported in the response metadata; only a failed fallback
//! surfaces an error to the caller.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sitevoice_core::{EmbeddingProvider, FilterValue, Filters};

use crate::cache::{search_cache_key, CacheLookup, RetrievalCache, SwrPolicy};
use crate::fusion::{fuse, FuseOptions, RankedItem, RankedList};
use crate::store::{CandidateQuery, Hit, IndexKind, VectorStore};
use crate::RetrievalError;

/// Maximum characters in a relevance snippet
const SNIPPET_MAX_CHARS: usize = 200;

/// Search strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Vector,
    Fulltext,
    Bm25,
    Structured,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Vector => "vector",
            SearchStrategy::Fulltext => "fulltext",
            SearchStrategy::Bm25 => "bm25",
            SearchStrategy::Structured => "structured",
        }
    }
}

/// Strategy data source
///
/// The engine reaches the store through this seam so tests can run an
/// in-memory backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn vector_candidates(
        &self,
        query: &CandidateQuery,
        embedding: &[f32],
    ) -> Result<Vec<Hit>, RetrievalError>;

    async fn fulltext_candidates(
        &self,
        query: &CandidateQuery,
        text: &str,
    ) -> Result<Vec<Hit>, RetrievalError>;

    async fn bm25_candidates(
        &self,
        query: &CandidateQuery,
        terms: &[String],
    ) -> Result<Vec<Hit>, RetrievalError>;

    async fn structured_candidates(
        &self,
        query: &CandidateQuery,
        text: &str,
    ) -> Result<Vec<Hit>, RetrievalError>;
}

#[async_trait]
impl SearchBackend for VectorStore {
    async fn vector_candidates(
        &self,
        query: &CandidateQuery,
        embedding: &[f32],
    ) -> Result<Vec<Hit>, RetrievalError> {
        self.nn_search(query, embedding).await
    }

    async fn fulltext_candidates(
        &self,
        query: &CandidateQuery,
        text: &str,
    ) -> Result<Vec<Hit>, RetrievalError> {
        self.fulltext_search(query, text).await
    }

    async fn bm25_candidates(
        &self,
        query: &CandidateQuery,
        terms: &[String],
    ) -> Result<Vec<Hit>, RetrievalError> {
        self.bm25_search(query, terms).await
    }

    async fn structured_candidates(
        &self,
        query: &CandidateQuery,
        text: &str,
    ) -> Result<Vec<Hit>, RetrievalError> {
        self.structured_search(query, text).await
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// RRF k constant
    pub rrf_k: f64,
    /// Fusion weight for the vector strategy; lexical strategies share
    /// the remainder
    pub vector_weight: f64,
    /// Cache TTL
    pub cache_ttl: Duration,
    /// Stale-while-revalidate window
    pub cache_swr: Duration,
    /// Per-strategy timeout
    pub strategy_timeout: Duration,
    /// ANN index session parameters to request
    pub use_index: Option<IndexKind>,
    /// Candidate multiplier per strategy (candidates = fan_out * top_k)
    pub fan_out_factor: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            vector_weight: 0.6,
            cache_ttl: Duration::from_secs(300),
            cache_swr: Duration::from_secs(60),
            strategy_timeout: Duration::from_millis(2_000),
            use_index: Some(IndexKind::Hnsw),
            fan_out_factor: 2,
        }
    }
}

/// A validated search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub query: String,
    pub top_k: usize,
    pub strategies: Vec<SearchStrategy>,
    /// Locale filter; absence means any locale
    pub locale: Option<String>,
    #[serde(default)]
    pub filters: Filters,
    /// Minimum similarity score for vector candidates
    pub min_score: Option<f32>,
    /// Skip the cache probe (used by revalidation)
    #[serde(default)]
    pub bypass_cache: bool,
}

impl SearchRequest {
    pub fn new(tenant_id: Uuid, site_id: Uuid, query: impl Into<String>) -> Self {
        Self {
            tenant_id,
            site_id,
            query: query.into(),
            top_k: 10,
            strategies: vec![SearchStrategy::Vector, SearchStrategy::Fulltext],
            locale: None,
            filters: Filters::new(),
            min_score: None,
            bypass_cache: false,
        }
    }

    fn validate(&self) -> Result<(), RetrievalError> {
        if self.query.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("query must not be empty".to_string()));
        }
        if self.top_k == 0 || self.top_k > 100 {
            return Err(RetrievalError::InvalidRequest(
                "top_k must be between 1 and 100".to_string(),
            ));
        }
        if self.strategies.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "at least one strategy is required".to_string(),
            ));
        }
        // The tenant filter is injected server-side; a client-supplied
        // value naming a different tenant is an isolation violation.
        if let Some(FilterValue::String(requested)) = self.filters.get("tenant_id") {
            if requested != &self.tenant_id.to_string() {
                return Err(RetrievalError::InvalidRequest(
                    "filters.tenant_id does not match the request tenant".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Fusion diagnostics attached to each match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionMeta {
    pub rrf_score: f64,
    pub system_scores: BTreeMap<String, f32>,
    pub system_ranks: BTreeMap<String, usize>,
    pub appears_in_systems: usize,
    /// `appears_in_systems / |requested strategies|`
    pub consensus_ratio: f64,
}

/// One fused, post-processed match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: Uuid,
    pub page_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub snippet: String,
    /// RRF score normalised to [0, 1] by the batch maximum
    pub score: f64,
    /// 1-based final rank
    pub rank: usize,
    pub fusion: FusionMeta,
}

/// How the cache participated in a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
    Bypass,
}

/// Per-strategy outcome, reported in response metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub strategy: String,
    pub ok: bool,
    pub hits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub matches: Vec<SearchMatch>,
    pub total_matches: usize,
    pub used_locale: Option<String>,
    /// Strategies that failed and were recovered locally
    pub degraded: Vec<String>,
    pub outcomes: Vec<SearchOutcome>,
    pub cache: CacheStatus,
    pub processing_time_ms: u64,
    pub search_id: Uuid,
}

/// Payload stored in the cache (response minus per-call fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSearch {
    matches: Vec<SearchMatch>,
    total_matches: usize,
    used_locale: Option<String>,
    degraded: Vec<String>,
    outcomes: Vec<SearchOutcome>,
}

/// Hybrid search engine
pub struct HybridSearchEngine {
    backend: Arc<dyn SearchBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<RetrievalCache>,
    config: EngineConfig,
}

impl HybridSearchEngine {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<RetrievalCache>,
        config: EngineConfig,
    ) -> Self {
        Self { backend, embedder, cache, config }
    }

    pub fn cache(&self) -> &Arc<RetrievalCache> {
        &self.cache
    }

    /// Run a search through cache, fan-out, fusion and post-processing
    pub async fn search(
        self: &Arc<Self>,
        request: SearchRequest,
    ) -> Result<SearchResponse, RetrievalError> {
        let started = Instant::now();
        request.validate()?;

        let key = self.cache_key(&request);

        if !request.bypass_cache {
            match self.cache.get(&key) {
                CacheLookup::Fresh(payload) => {
                    if let Ok(cached) = serde_json::from_value::<CachedSearch>(payload) {
                        return Ok(self.respond(cached, CacheStatus::Hit, started));
                    }
                },
                CacheLookup::Stale(payload) => {
                    if let Ok(cached) = serde_json::from_value::<CachedSearch>(payload) {
                        self.schedule_revalidation(&key, &request);
                        return Ok(self.respond(cached, CacheStatus::Stale, started));
                    }
                },
                CacheLookup::Miss => {},
            }
        }

        let cached = self.execute(&request).await?;
        self.write_cache(&key, &request, &cached);

        let status = if request.bypass_cache { CacheStatus::Bypass } else { CacheStatus::Miss };
        Ok(self.respond(cached, status, started))
    }

    /// Detached background refresh; at most one per key
    fn schedule_revalidation(self: &Arc<Self>, key: &str, request: &SearchRequest) {
        if !self.cache.begin_revalidation(key) {
            return;
        }

        let engine = Arc::clone(self);
        let key = key.to_string();
        let mut refresh = request.clone();
        refresh.bypass_cache = true;

        tokio::spawn(async move {
            match engine.execute(&refresh).await {
                Ok(cached) => {
                    engine.write_cache(&key, &refresh, &cached);
                    tracing::debug!(key = %key, "Cache revalidated");
                },
                Err(e) => {
                    // Stale value keeps serving until ttl+swr elapses.
                    tracing::warn!(key = %key, error = %e, "Cache revalidation failed");
                },
            }
            engine.cache.finish_revalidation(&key);
        });
    }

    fn cache_key(&self, request: &SearchRequest) -> String {
        search_cache_key(
            request.tenant_id,
            request.locale.as_deref(),
            self.embedder.model(),
            request.top_k,
            &request.query,
            &request.filters,
            Some(self.config.vector_weight),
        )
    }

    fn write_cache(&self, key: &str, request: &SearchRequest, cached: &CachedSearch) {
        if let Ok(payload) = serde_json::to_value(cached) {
            self.cache.set(
                key,
                payload,
                request.tenant_id,
                "search",
                SwrPolicy { ttl: self.config.cache_ttl, swr: self.config.cache_swr },
            );
        }
    }

    fn respond(&self, cached: CachedSearch, cache: CacheStatus, started: Instant) -> SearchResponse {
        SearchResponse {
            matches: cached.matches,
            total_matches: cached.total_matches,
            used_locale: cached.used_locale,
            degraded: cached.degraded,
            outcomes: cached.outcomes,
            cache,
            processing_time_ms: started.elapsed().as_millis() as u64,
            search_id: Uuid::new_v4(),
        }
    }

    /// The uncached pipeline: embed, fan out, fuse, post-process
    async fn execute(&self, request: &SearchRequest) -> Result<CachedSearch, RetrievalError> {
        let embedding = self
            .embedder
            .embed(&request.query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let candidate_query = CandidateQuery {
            tenant_id: request.tenant_id,
            site_id: request.site_id,
            locale: request.locale.clone(),
            limit: request.top_k * self.config.fan_out_factor.max(2),
            min_score: request.min_score,
            use_index: self.config.use_index,
        };

        let terms = query_tokens(&request.query);

        let mut tasks = Vec::with_capacity(request.strategies.len());
        for strategy in &request.strategies {
            tasks.push(self.run_strategy(*strategy, &candidate_query, &request.query, &embedding, &terms));
        }
        let settled = futures::future::join_all(tasks).await;

        let mut outcomes = Vec::with_capacity(settled.len());
        let mut degraded = Vec::new();
        let mut lists = Vec::new();
        let mut by_id: HashMap<Uuid, Hit> = HashMap::new();

        for (strategy, result) in request.strategies.iter().zip(settled) {
            match result {
                Ok(hits) => {
                    outcomes.push(SearchOutcome {
                        strategy: strategy.as_str().to_string(),
                        ok: true,
                        hits: hits.len(),
                        error: None,
                    });
                    lists.push(self.ranked_list(*strategy, &hits));
                    for hit in hits {
                        by_id.entry(hit.id).or_insert(hit);
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.as_str(),
                        tenant_id = %request.tenant_id,
                        error = %e,
                        "Search strategy failed"
                    );
                    degraded.push(strategy.as_str().to_string());
                    outcomes.push(SearchOutcome {
                        strategy: strategy.as_str().to_string(),
                        ok: false,
                        hits: 0,
                        error: Some(e.to_string()),
                    });
                },
            }
        }

        // Every strategy failed: one vector-only retry, then give up.
        if lists.is_empty() {
            tracing::warn!(tenant_id = %request.tenant_id, "All strategies failed, trying vector-only fallback");
            let fallback = tokio::time::timeout(
                self.config.strategy_timeout,
                self.backend.vector_candidates(&candidate_query, &embedding),
            )
            .await
            .map_err(|_| RetrievalError::Unavailable("vector fallback timed out".to_string()))?
            .map_err(|e| RetrievalError::Unavailable(format!("vector fallback failed: {}", e)))?;

            outcomes.push(SearchOutcome {
                strategy: "vector-fallback".to_string(),
                ok: true,
                hits: fallback.len(),
                error: None,
            });
            lists.push(self.ranked_list(SearchStrategy::Vector, &fallback));
            for hit in fallback {
                by_id.entry(hit.id).or_insert(hit);
            }
        }

        let fused = fuse(
            &lists,
            &FuseOptions { k_rrf: self.config.rrf_k, ..Default::default() },
        );

        let max_score = fused.first().map(|item| item.rrf_score).unwrap_or(0.0);
        let strategy_count = request.strategies.len();

        let matches: Vec<SearchMatch> = fused
            .into_iter()
            .take(request.top_k)
            .enumerate()
            .filter_map(|(position, item)| {
                let hit = by_id.get(&item.id)?;
                let normalised =
                    if max_score > 0.0 { item.rrf_score / max_score } else { 0.0 };
                Some(SearchMatch {
                    id: item.id,
                    page_id: hit.page_id,
                    url: hit.url.clone(),
                    title: hit.title.clone(),
                    snippet: extract_snippet(&hit.content, &terms, SNIPPET_MAX_CHARS),
                    score: normalised,
                    rank: position + 1,
                    fusion: FusionMeta {
                        rrf_score: item.rrf_score,
                        system_scores: item.system_scores,
                        system_ranks: item.system_ranks,
                        appears_in_systems: item.appears_in_systems,
                        consensus_ratio: item.appears_in_systems as f64 / strategy_count as f64,
                    },
                })
            })
            .collect();

        Ok(CachedSearch {
            total_matches: matches.len(),
            matches,
            used_locale: request.locale.clone(),
            degraded,
            outcomes,
        })
    }

    async fn run_strategy(
        &self,
        strategy: SearchStrategy,
        query: &CandidateQuery,
        text: &str,
        embedding: &[f32],
        terms: &[String],
    ) -> Result<Vec<Hit>, RetrievalError> {
        let work = async {
            match strategy {
                SearchStrategy::Vector => self.backend.vector_candidates(query, embedding).await,
                SearchStrategy::Fulltext => self.backend.fulltext_candidates(query, text).await,
                SearchStrategy::Bm25 => self.backend.bm25_candidates(query, terms).await,
                SearchStrategy::Structured => {
                    self.backend.structured_candidates(query, text).await
                },
            }
        };
        tokio::time::timeout(self.config.strategy_timeout, work)
            .await
            .map_err(|_| {
                RetrievalError::Transient(format!("{} strategy timed out", strategy.as_str()))
            })?
    }

    fn ranked_list(&self, strategy: SearchStrategy, hits: &[Hit]) -> RankedList {
        let weight = match strategy {
            SearchStrategy::Vector => self.config.vector_weight,
            _ => 1.0 - self.config.vector_weight,
        };
        RankedList::new(
            strategy.as_str(),
            hits.iter().map(|hit| RankedItem { id: hit.id, score: hit.score }).collect(),
        )
        .with_weight(weight)
    }
}

/// Lowercased query tokens with punctuation stripped
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|word| !word.is_empty())
        .collect()
}

/// Extract a relevance snippet centred on the first query-token hit
///
/// At most `max_chars` characters; ellipses mark truncation on either
/// side. Falls back to the content head when no token occurs.
pub fn extract_snippet(content: &str, tokens: &[String], max_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= max_chars {
        return content.to_string();
    }

    let lowered = content.to_lowercase();
    let hit_char_pos = tokens
        .iter()
        .filter_map(|token| lowered.find(token.as_str()))
        .min()
        .map(|byte_pos| lowered[..byte_pos].chars().count());

    let (start, end) = match hit_char_pos {
        Some(centre) => {
            let half = max_chars / 2;
            let start = centre.saturating_sub(half);
            let end = (start + max_chars).min(chars.len());
            (end.saturating_sub(max_chars), end)
        },
        None => (0, max_chars),
    };

    let body: String = chars[start..end].iter().collect();
    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < chars.len() { "..." } else { "" };
    format!("{}{}{}", prefix, body.trim(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitevoice_core::ChunkMetadata;

    struct MockEmbedder;

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        async fn embed(&self, text: &str) -> sitevoice_core::Result<Vec<f32>> {
            // Deterministic 4-dim embeddings for the seed corpus.
            let vector = match text {
                t if t.contains("cat") => vec![1.0, 0.0, 0.0, 0.0],
                t if t.contains("dog") => vec![0.0, 1.0, 0.0, 0.0],
                _ => vec![0.5, 0.5, 0.5, 0.5],
            };
            Ok(vector)
        }

        async fn embed_batch(&self, texts: &[String]) -> sitevoice_core::Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn model(&self) -> &str {
            "mock-4d"
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    struct MemoryBackend {
        entries: Vec<(Hit, Vec<f32>, Uuid, Uuid)>,
        fail_fulltext: bool,
        fail_vector: bool,
    }

    impl MemoryBackend {
        fn new() -> Self {
            Self { entries: Vec::new(), fail_fulltext: false, fail_vector: false }
        }

        fn insert(&mut self, tenant: Uuid, site: Uuid, index: i32, content: &str, vector: Vec<f32>) {
            let hit = Hit {
                id: Uuid::new_v4(),
                page_id: Uuid::new_v4(),
                chunk_index: index,
                distance: None,
                score: 0.0,
                content: content.to_string(),
                url: format!("https://example.com/{}", index),
                title: None,
                metadata: ChunkMetadata::default(),
            };
            self.entries.push((hit, vector, tenant, site));
        }
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_a * norm_b)
    }

    #[async_trait]
    impl SearchBackend for MemoryBackend {
        async fn vector_candidates(
            &self,
            query: &CandidateQuery,
            embedding: &[f32],
        ) -> Result<Vec<Hit>, RetrievalError> {
            if self.fail_vector {
                return Err(RetrievalError::Transient("vector down".to_string()));
            }
            let mut hits: Vec<Hit> = self
                .entries
                .iter()
                .filter(|(_, _, tenant, site)| *tenant == query.tenant_id && *site == query.site_id)
                .map(|(hit, vector, _, _)| {
                    let distance = cosine_distance(embedding, vector);
                    let mut hit = hit.clone();
                    hit.distance = Some(distance);
                    hit.score = 1.0 - distance;
                    hit
                })
                .collect();
            hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
            hits.truncate(query.limit);
            Ok(hits)
        }

        async fn fulltext_candidates(
            &self,
            query: &CandidateQuery,
            text: &str,
        ) -> Result<Vec<Hit>, RetrievalError> {
            if self.fail_fulltext {
                return Err(RetrievalError::Transient("fulltext down".to_string()));
            }
            let tokens = query_tokens(text);
            let mut hits: Vec<Hit> = self
                .entries
                .iter()
                .filter(|(_, _, tenant, site)| *tenant == query.tenant_id && *site == query.site_id)
                .filter_map(|(hit, _, _, _)| {
                    let content_tokens = query_tokens(&hit.content);
                    let matched =
                        tokens.iter().filter(|t| content_tokens.contains(t)).count();
                    if matched == 0 {
                        return None;
                    }
                    let mut hit = hit.clone();
                    hit.score = matched as f32;
                    Some(hit)
                })
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            hits.truncate(query.limit);
            Ok(hits)
        }

        async fn bm25_candidates(
            &self,
            query: &CandidateQuery,
            terms: &[String],
        ) -> Result<Vec<Hit>, RetrievalError> {
            self.fulltext_candidates(query, &terms.join(" ")).await
        }

        async fn structured_candidates(
            &self,
            _query: &CandidateQuery,
            _text: &str,
        ) -> Result<Vec<Hit>, RetrievalError> {
            Ok(Vec::new())
        }
    }

    fn engine_with(backend: MemoryBackend) -> Arc<HybridSearchEngine> {
        Arc::new(HybridSearchEngine::new(
            Arc::new(backend),
            Arc::new(MockEmbedder),
            Arc::new(RetrievalCache::new()),
            EngineConfig::default(),
        ))
    }

    fn seeded_backend(tenant: Uuid, site: Uuid) -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.insert(tenant, site, 0, "The cat sat", vec![1.0, 0.0, 0.0, 0.0]);
        backend.insert(tenant, site, 1, "A dog barked", vec![0.0, 1.0, 0.0, 0.0]);
        backend.insert(tenant, site, 2, "Cats and dogs", vec![0.7, 0.7, 0.0, 0.0]);
        backend
    }

    #[tokio::test]
    async fn test_happy_path_search() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let engine = engine_with(seeded_backend(tenant, site));

        let mut request = SearchRequest::new(tenant, site, "cat");
        request.top_k = 2;

        let response = engine.search(request).await.unwrap();
        assert_eq!(response.matches.len(), 2);
        assert_eq!(response.matches[0].rank, 1);
        assert!(response.matches[0].snippet.contains("cat sat"));
        assert_eq!(response.matches[0].fusion.appears_in_systems, 2);
        assert_eq!(response.matches[0].fusion.consensus_ratio, 1.0);
        assert!(response.matches[1].snippet.contains("Cats and dogs"));
        assert!(response.degraded.is_empty());
        assert_eq!(response.cache, CacheStatus::Miss);
        // Normalised by batch max, so the top match scores 1.0.
        assert!((response.matches[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let site = Uuid::new_v4();
        let engine = engine_with(seeded_backend(tenant_a, site));

        let response = engine
            .search(SearchRequest::new(tenant_b, site, "cat"))
            .await
            .unwrap();
        assert!(response.matches.is_empty());
        assert_eq!(response.total_matches, 0);
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let engine = engine_with(MemoryBackend::new());

        let empty_query = SearchRequest::new(tenant, site, "   ");
        assert!(matches!(
            engine.search(empty_query).await,
            Err(RetrievalError::InvalidRequest(_))
        ));

        let mut bad_top_k = SearchRequest::new(tenant, site, "cat");
        bad_top_k.top_k = 101;
        assert!(matches!(
            engine.search(bad_top_k).await,
            Err(RetrievalError::InvalidRequest(_))
        ));

        let mut no_strategies = SearchRequest::new(tenant, site, "cat");
        no_strategies.strategies.clear();
        assert!(matches!(
            engine.search(no_strategies).await,
            Err(RetrievalError::InvalidRequest(_))
        ));

        let mut foreign_tenant = SearchRequest::new(tenant, site, "cat");
        foreign_tenant
            .filters
            .insert("tenant_id", FilterValue::String(Uuid::new_v4().to_string()));
        assert!(matches!(
            engine.search(foreign_tenant).await,
            Err(RetrievalError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_degraded_strategy_recovers_locally() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let mut backend = seeded_backend(tenant, site);
        backend.fail_fulltext = true;
        let engine = engine_with(backend);

        let response = engine
            .search(SearchRequest::new(tenant, site, "cat"))
            .await
            .unwrap();
        assert_eq!(response.degraded, vec!["fulltext".to_string()]);
        assert!(!response.matches.is_empty());
    }

    #[tokio::test]
    async fn test_all_failed_surfaces_unavailable() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let mut backend = seeded_backend(tenant, site);
        backend.fail_fulltext = true;
        backend.fail_vector = true;
        let engine = engine_with(backend);

        let result = engine.search(SearchRequest::new(tenant, site, "cat")).await;
        assert!(matches!(result, Err(RetrievalError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_cache_hit_then_stale_revalidation() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let mut config = EngineConfig::default();
        config.cache_ttl = Duration::from_millis(50);
        config.cache_swr = Duration::from_millis(500);
        let engine = Arc::new(HybridSearchEngine::new(
            Arc::new(seeded_backend(tenant, site)),
            Arc::new(MockEmbedder),
            Arc::new(RetrievalCache::new()),
            config,
        ));

        let request = SearchRequest::new(tenant, site, "cat");
        let first = engine.search(request.clone()).await.unwrap();
        assert_eq!(first.cache, CacheStatus::Miss);

        let second = engine.search(request.clone()).await.unwrap();
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(
            first.matches.iter().map(|m| m.id).collect::<Vec<_>>(),
            second.matches.iter().map(|m| m.id).collect::<Vec<_>>()
        );

        tokio::time::sleep(Duration::from_millis(70)).await;
        let third = engine.search(request.clone()).await.unwrap();
        assert_eq!(third.cache, CacheStatus::Stale);

        // Give the detached revalidation a moment; the entry is fresh again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fourth = engine.search(request).await.unwrap();
        assert_eq!(fourth.cache, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_deterministic_result_order() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let engine = engine_with(seeded_backend(tenant, site));

        let mut request = SearchRequest::new(tenant, site, "cat");
        request.bypass_cache = true;

        let first = engine.search(request.clone()).await.unwrap();
        let second = engine.search(request).await.unwrap();
        assert_eq!(
            first.matches.iter().map(|m| m.id).collect::<Vec<_>>(),
            second.matches.iter().map(|m| m.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_query_tokens_strip_punctuation() {
        assert_eq!(query_tokens("What is the Cat's price?"), vec![
            "what", "is", "the", "cat's", "price"
        ]);
    }

    #[test]
    fn test_snippet_short_content_untouched() {
        let snippet = extract_snippet("short text", &["text".to_string()], 200);
        assert_eq!(snippet, "short text");
    }

    #[test]
    fn test_snippet_centres_on_token_with_ellipses() {
        let long = format!("{} needle {}", "x".repeat(300), "y".repeat(300));
        let snippet = extract_snippet(&long, &["needle".to_string()], 200);
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.chars().count() <= 206);
    }

    #[test]
    fn test_snippet_fallback_to_head() {
        let long = "word ".repeat(100);
        let snippet = extract_snippet(&long, &["absent".to_string()], 50);
        assert!(snippet.starts_with("word"));
        assert!(snippet.ends_with("..."));
    }
}
