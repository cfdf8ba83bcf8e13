//! Incremental indexer
//!
//! Feeds the vector store from crawl sessions. Delta sessions compare
//! cheap page hashes against stored document metadata and only fetch,
//! chunk and embed what actually changed; full sessions additionally
//! soft-delete documents the sweep no longer sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use sitevoice_core::{
    ChunkMetadata, ChunkRecord, CrawlerDriver, DocumentRecord, EmbeddingProvider, EmbeddingRecord,
};
use sitevoice_retrieval::store::{UpsertOutcome, VectorStore};
use sitevoice_retrieval::RetrievalError;

use crate::chunker::{ChunkerConfig, TextChunker};
use crate::IndexError;

/// Hard cap on concurrent page tasks
pub const MAX_PARALLELISM: usize = 20;

/// Hard cap on texts per embedding batch
pub const MAX_EMBED_BATCH: usize = 100;

/// Index session kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Full,
    Delta,
    Selective,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Full => "full",
            SessionKind::Delta => "delta",
            SessionKind::Selective => "selective",
        }
    }
}

/// Hint carried over from the previous crawl
#[derive(Debug, Clone, Default)]
pub struct LastCrawlInfo {
    pub last_crawl_time: Option<DateTime<Utc>>,
    /// Opaque fingerprint of the previous session; informational only
    pub last_crawl_hash: Option<String>,
}

/// Indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Concurrent page tasks, clamped to [1, 20]
    pub parallelism: usize,
    /// Per-URL retry attempts
    pub retry_attempts: u32,
    /// Chunking parameters
    pub chunker: ChunkerConfig,
    /// Texts per embedding batch, clamped to [1, 100]
    pub embed_batch: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            retry_attempts: 3,
            chunker: ChunkerConfig::default(),
            embed_batch: 50,
        }
    }
}

/// Aggregate result of an index session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub chunks_upserted: usize,
    pub chunks_skipped: usize,
    pub documents_deleted: u64,
    /// Session observed the cancel flag before finishing
    pub cancelled: bool,
}

/// Store surface the indexer needs
///
/// `VectorStore` is the production implementation; tests plug in an
/// in-memory store.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_document(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        canonical_url: &str,
    ) -> Result<Option<DocumentRecord>, RetrievalError>;

    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<(), RetrievalError>;

    async fn list_documents(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
    ) -> Result<Vec<DocumentRecord>, RetrievalError>;

    async fn soft_delete_untouched(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        touched: &[Uuid],
    ) -> Result<u64, RetrievalError>;

    async fn chunk_hashes(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<HashMap<i32, String>, RetrievalError>;

    async fn delete_chunks_from(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        first_stale_index: i32,
    ) -> Result<u64, RetrievalError>;

    async fn upsert(
        &self,
        chunks: &[(ChunkRecord, EmbeddingRecord)],
    ) -> Result<UpsertOutcome, RetrievalError>;
}

#[async_trait]
impl IndexStore for VectorStore {
    async fn get_document(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        canonical_url: &str,
    ) -> Result<Option<DocumentRecord>, RetrievalError> {
        VectorStore::get_document(self, tenant_id, site_id, canonical_url).await
    }

    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<(), RetrievalError> {
        VectorStore::upsert_document(self, doc).await
    }

    async fn list_documents(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
    ) -> Result<Vec<DocumentRecord>, RetrievalError> {
        VectorStore::list_documents(self, tenant_id, site_id).await
    }

    async fn soft_delete_untouched(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        touched: &[Uuid],
    ) -> Result<u64, RetrievalError> {
        VectorStore::soft_delete_untouched(self, tenant_id, site_id, touched).await
    }

    async fn chunk_hashes(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<HashMap<i32, String>, RetrievalError> {
        VectorStore::chunk_hashes(self, tenant_id, document_id).await
    }

    async fn delete_chunks_from(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        first_stale_index: i32,
    ) -> Result<u64, RetrievalError> {
        VectorStore::delete_chunks_from(self, tenant_id, document_id, first_stale_index).await
    }

    async fn upsert(
        &self,
        chunks: &[(ChunkRecord, EmbeddingRecord)],
    ) -> Result<UpsertOutcome, RetrievalError> {
        VectorStore::upsert(self, chunks).await
    }
}

/// Outcome of a single page task
#[derive(Debug, Default)]
struct PageOutcome {
    document_id: Option<Uuid>,
    processed: bool,
    skipped: bool,
    failed: bool,
    chunks_upserted: usize,
    chunks_skipped: usize,
    chunks_deleted: u64,
}

/// The incremental indexer
pub struct IncrementalIndexer {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    driver: Arc<dyn CrawlerDriver>,
    chunker: TextChunker,
    config: IndexerConfig,
}

impl IncrementalIndexer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        driver: Arc<dyn CrawlerDriver>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            chunker: TextChunker::new(config.chunker),
            store,
            embedder,
            driver,
            config,
        }
    }

    /// Run one index session
    ///
    /// `urls` is required for selective sessions and ignored otherwise.
    /// Cancellation is cooperative: in-flight page tasks complete, queued
    /// ones observe the flag and exit.
    pub async fn run(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        site_url: &str,
        kind: SessionKind,
        urls: Option<Vec<String>>,
        last_crawl: Option<LastCrawlInfo>,
        cancel: Arc<AtomicBool>,
    ) -> Result<IndexOutcome, IndexError> {
        let candidates = match kind {
            SessionKind::Selective => urls.ok_or_else(|| {
                IndexError::Driver("selective session requires a URL list".to_string())
            })?,
            SessionKind::Full | SessionKind::Delta => self.enumerate(tenant_id, site_id, site_url).await?,
        };

        tracing::info!(
            tenant_id = %tenant_id,
            site_id = %site_id,
            kind = kind.as_str(),
            candidates = candidates.len(),
            "Index session starting"
        );

        let parallelism = self.config.parallelism.clamp(1, MAX_PARALLELISM);
        let last_crawl = last_crawl.unwrap_or_default();

        let page_outcomes: Vec<PageOutcome> = stream::iter(candidates.into_iter())
            .map(|url: String| self.process_url(tenant_id, site_id, url, kind, &last_crawl, &cancel))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut outcome = IndexOutcome::default();
        let mut touched = Vec::new();
        for page in &page_outcomes {
            if page.processed {
                outcome.pages_processed += 1;
            }
            if page.skipped {
                outcome.pages_skipped += 1;
            }
            if page.failed {
                outcome.pages_failed += 1;
            }
            outcome.chunks_upserted += page.chunks_upserted;
            outcome.chunks_skipped += page.chunks_skipped;
            if let Some(id) = page.document_id {
                touched.push(id);
            }
        }

        outcome.cancelled = cancel.load(Ordering::Relaxed);

        // A full sweep retires every site document it did not see, unless
        // the session was cancelled part-way through.
        if kind == SessionKind::Full && !outcome.cancelled {
            outcome.documents_deleted = self
                .store
                .soft_delete_untouched(tenant_id, site_id, &touched)
                .await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            site_id = %site_id,
            processed = outcome.pages_processed,
            skipped = outcome.pages_skipped,
            failed = outcome.pages_failed,
            deleted = outcome.documents_deleted,
            cancelled = outcome.cancelled,
            "Index session finished"
        );

        Ok(outcome)
    }

    /// Candidate URLs: sitemap enumeration merged with known documents
    async fn enumerate(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        site_url: &str,
    ) -> Result<Vec<String>, IndexError> {
        let mut urls = self
            .driver
            .enumerate(site_url)
            .await
            .map_err(|e| IndexError::Driver(e.to_string()))?;

        for doc in self.store.list_documents(tenant_id, site_id).await? {
            if !urls.contains(&doc.canonical_url) {
                urls.push(doc.canonical_url);
            }
        }
        Ok(urls)
    }

    async fn process_url(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        url: String,
        kind: SessionKind,
        last_crawl: &LastCrawlInfo,
        cancel: &Arc<AtomicBool>,
    ) -> PageOutcome {
        if cancel.load(Ordering::Relaxed) {
            return PageOutcome { skipped: true, ..Default::default() };
        }

        match self.index_page(tenant_id, site_id, &url, kind, last_crawl).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Page indexing failed");
                PageOutcome { failed: true, ..Default::default() }
            },
        }
    }

    async fn index_page(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        url: &str,
        kind: SessionKind,
        last_crawl: &LastCrawlInfo,
    ) -> Result<PageOutcome, IndexError> {
        let attempts = self.config.retry_attempts;

        let probe = with_retries(attempts, || self.driver.probe(url)).await?;
        let existing = self.store.get_document(tenant_id, site_id, url).await?;

        // Selective sessions always fetch; delta and full skip pages whose
        // cheap hash and lastmod say nothing changed.
        if kind != SessionKind::Selective {
            if let Some(doc) = &existing {
                let hash_unchanged = doc.page_hash == probe.page_hash;
                let not_newer = match (probe.lastmod, doc.lastmod.or(last_crawl.last_crawl_time)) {
                    (Some(probed), Some(stored)) => probed <= stored,
                    _ => true,
                };
                if hash_unchanged && not_newer && !doc.is_deleted {
                    return Ok(PageOutcome {
                        document_id: Some(doc.id),
                        skipped: true,
                        ..Default::default()
                    });
                }
            }
        }

        let page = with_retries(attempts, || self.driver.fetch(url)).await?;
        let document_id = existing.as_ref().map(|d| d.id).unwrap_or_else(Uuid::new_v4);

        let extracted = self.chunker.chunk(&page.content);
        let stored_hashes = if existing.is_some() {
            self.store.chunk_hashes(tenant_id, document_id).await?
        } else {
            HashMap::new()
        };

        let mut outcome = PageOutcome { document_id: Some(document_id), processed: true, ..Default::default() };

        // Only changed chunks are embedded and upserted; identical
        // (index, hash) slots are a no-op.
        let mut changed: Vec<(ChunkRecord, String)> = Vec::new();
        for chunk in &extracted {
            let hash = content_hash(&chunk.content);
            let index = chunk.index as i32;
            if stored_hashes.get(&index) == Some(&hash) {
                outcome.chunks_skipped += 1;
                continue;
            }
            changed.push((
                ChunkRecord {
                    id: Uuid::new_v4(),
                    document_id,
                    tenant_id,
                    site_id,
                    chunk_index: index,
                    content: chunk.content.clone(),
                    cleaned_content: normalise_whitespace(&chunk.content),
                    content_hash: hash,
                    hpath: page.title.as_ref().map(|_| "h1".to_string()),
                    selector: None,
                    word_count: chunk.word_count as i32,
                    token_count: chunk.token_count as i32,
                    locale: page.locale.clone(),
                    metadata: ChunkMetadata::default(),
                },
                chunk.content.clone(),
            ));
        }

        for batch in changed.chunks(self.config.embed_batch.clamp(1, MAX_EMBED_BATCH)) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| IndexError::Embedding(e.to_string()))?;

            let pairs: Vec<(ChunkRecord, EmbeddingRecord)> = batch
                .iter()
                .zip(vectors)
                .map(|((record, _), vector)| {
                    let embedding = EmbeddingRecord {
                        chunk_id: record.id,
                        tenant_id,
                        site_id,
                        model: self.embedder.model().to_string(),
                        dimensions: vector.len() as i32,
                        vector,
                    };
                    (record.clone(), embedding)
                })
                .collect();

            let upserted = self.store.upsert(&pairs).await?;
            outcome.chunks_upserted += upserted.inserted;
            outcome.chunks_skipped += upserted.skipped;
        }

        // Stale tail: chunks beyond the new set are removed.
        let stored_count = stored_hashes.keys().map(|i| i + 1).max().unwrap_or(0);
        if (extracted.len() as i32) < stored_count {
            outcome.chunks_deleted = self
                .store
                .delete_chunks_from(tenant_id, document_id, extracted.len() as i32)
                .await?;
        }

        let new_content_hash = content_hash(&page.content);
        let version = match &existing {
            Some(doc) if doc.content_hash == new_content_hash => doc.version,
            Some(doc) => doc.version + 1,
            None => 1,
        };

        self.store
            .upsert_document(&DocumentRecord {
                id: document_id,
                tenant_id,
                site_id,
                canonical_url: page.canonical_url.clone(),
                title: page.title.clone(),
                content_hash: new_content_hash,
                page_hash: page.page_hash.clone(),
                lastmod: page.lastmod,
                last_crawled: Some(Utc::now()),
                etag: page.etag.clone(),
                locale: page.locale.clone(),
                version,
                is_deleted: false,
            })
            .await?;

        Ok(outcome)
    }
}

/// SHA-256 hex digest of content, the chunk identity fingerprint
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .as_slice()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn normalise_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Retry with exponential backoff and jitter
async fn with_retries<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, IndexError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = sitevoice_core::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut delay = Duration::from_millis(200);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = e.to_string();
                if attempt + 1 < attempts {
                    let jitter = rand::thread_rng().gen_range(0..50);
                    tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                    delay *= 2;
                }
            },
        }
    }

    Err(IndexError::Driver(format!(
        "failed after {} attempts: {}",
        attempts, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryIndexStore, MockEmbedder, ScriptedDriver};

    fn indexer(
        store: Arc<MemoryIndexStore>,
        driver: Arc<ScriptedDriver>,
    ) -> IncrementalIndexer {
        IncrementalIndexer::new(
            store,
            Arc::new(MockEmbedder::new(4)),
            driver,
            IndexerConfig { parallelism: 4, retry_attempts: 2, ..Default::default() },
        )
    }

    #[tokio::test]
    async fn test_full_crawl_then_delta_touches_only_changed_page() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let store = Arc::new(MemoryIndexStore::new());
        let driver = Arc::new(ScriptedDriver::new());
        for i in 0..5 {
            driver.set_page(&format!("https://s.example/p{}", i), &format!("Page {} body text.", i));
        }

        let idx = indexer(store.clone(), driver.clone());
        let cancel = Arc::new(AtomicBool::new(false));

        let first = idx
            .run(tenant, site, "https://s.example", SessionKind::Full, None, None, cancel.clone())
            .await
            .unwrap();
        assert_eq!(first.pages_processed, 5);
        assert_eq!(first.pages_failed, 0);

        let versions_before: HashMap<String, i32> = store
            .list_documents(tenant, site)
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.canonical_url, d.version))
            .collect();

        // One page changes, one disappears from the sitemap.
        driver.set_page("https://s.example/p2", "Page 2 body text, now updated.");
        driver.remove_page("https://s.example/p4");

        let delta = idx
            .run(tenant, site, "https://s.example", SessionKind::Delta, None, None, cancel.clone())
            .await
            .unwrap();
        assert_eq!(delta.pages_processed, 1);
        assert!(delta.pages_skipped >= 3);

        let docs = store.list_documents(tenant, site).await.unwrap();
        for doc in &docs {
            let before = versions_before[&doc.canonical_url];
            if doc.canonical_url.ends_with("p2") {
                assert_eq!(doc.version, before + 1);
            } else {
                assert_eq!(doc.version, before);
            }
        }

        // The vanished URL survives a delta; a full sweep soft-deletes it.
        let full = idx
            .run(tenant, site, "https://s.example", SessionKind::Full, None, None, cancel)
            .await
            .unwrap();
        assert_eq!(full.documents_deleted, 1);
        let remaining = store.list_documents(tenant, site).await.unwrap();
        assert_eq!(remaining.len(), 4);
        assert!(remaining.iter().all(|d| !d.canonical_url.ends_with("p4")));
    }

    #[tokio::test]
    async fn test_changed_chunk_keeps_slot_id() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let store = Arc::new(MemoryIndexStore::new());
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/page", "Original body text.");

        let idx = indexer(store.clone(), driver.clone());
        let cancel = Arc::new(AtomicBool::new(false));

        idx.run(tenant, site, "https://s.example", SessionKind::Full, None, None, cancel.clone())
            .await
            .unwrap();
        let doc = store.list_documents(tenant, site).await.unwrap().remove(0);
        let original_id = store.chunk_id_at(doc.id, 0).unwrap();
        assert_eq!(store.embedding_count(), 1);

        driver.set_page("https://s.example/page", "Rewritten body text.");
        let delta = idx
            .run(tenant, site, "https://s.example", SessionKind::Delta, None, None, cancel)
            .await
            .unwrap();
        assert_eq!(delta.chunks_upserted, 1);

        // The slot is rewritten in place: same chunk id, one embedding row.
        assert_eq!(store.chunk_id_at(doc.id, 0), Some(original_id));
        assert_eq!(store.embedding_count(), 1);
    }

    #[tokio::test]
    async fn test_selective_always_fetches() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let store = Arc::new(MemoryIndexStore::new());
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/only", "Selective page body.");

        let idx = indexer(store.clone(), driver.clone());
        let cancel = Arc::new(AtomicBool::new(false));

        let urls = Some(vec!["https://s.example/only".to_string()]);
        let first = idx
            .run(tenant, site, "https://s.example", SessionKind::Selective, urls.clone(), None, cancel.clone())
            .await
            .unwrap();
        assert_eq!(first.pages_processed, 1);

        // Unchanged content is still fetched, but chunk upserts are no-ops.
        let second = idx
            .run(tenant, site, "https://s.example", SessionKind::Selective, urls, None, cancel)
            .await
            .unwrap();
        assert_eq!(second.pages_processed, 1);
        assert_eq!(second.chunks_upserted, 0);
    }

    #[tokio::test]
    async fn test_selective_without_urls_is_an_error() {
        let store = Arc::new(MemoryIndexStore::new());
        let driver = Arc::new(ScriptedDriver::new());
        let idx = indexer(store, driver);
        let result = idx
            .run(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "https://s.example",
                SessionKind::Selective,
                None,
                None,
                Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(matches!(result, Err(IndexError::Driver(_))));
    }

    #[tokio::test]
    async fn test_failed_page_does_not_abort_session() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let store = Arc::new(MemoryIndexStore::new());
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/ok", "Good page.");
        driver.fail_url("https://s.example/bad");

        let idx = indexer(store.clone(), driver);
        let outcome = idx
            .run(
                tenant,
                site,
                "https://s.example",
                SessionKind::Full,
                None,
                None,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.pages_processed, 1);
        assert_eq!(outcome.pages_failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_flag_skips_remaining_pages() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let store = Arc::new(MemoryIndexStore::new());
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/a", "Page a.");

        let idx = indexer(store, driver);
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = idx
            .run(tenant, site, "https://s.example", SessionKind::Full, None, None, cancel)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.pages_processed, 0);
        assert_eq!(outcome.documents_deleted, 0);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
