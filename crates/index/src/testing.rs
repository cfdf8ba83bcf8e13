//! In-memory fixtures shared by this crate's tests

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use sitevoice_core::{
    ChunkRecord, CrawledPage, CrawlerDriver, DocumentRecord, EmbeddingProvider, EmbeddingRecord,
    Error, PageProbe, Result,
};
use sitevoice_retrieval::store::UpsertOutcome;
use sitevoice_retrieval::RetrievalError;

use crate::indexer::{content_hash, IndexStore};

/// In-memory stand-in for the Postgres store
pub struct MemoryIndexStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<(Uuid, String), DocumentRecord>,
    chunks: HashMap<Uuid, HashMap<i32, ChunkRecord>>,
    embeddings: HashMap<Uuid, EmbeddingRecord>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(MemoryState::default()) }
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.values().map(|c| c.len()).sum()
    }

    pub fn embedding_count(&self) -> usize {
        self.state.lock().embeddings.len()
    }

    pub fn chunk_id_at(&self, document_id: Uuid, chunk_index: i32) -> Option<Uuid> {
        self.state
            .lock()
            .chunks
            .get(&document_id)
            .and_then(|by_index| by_index.get(&chunk_index))
            .map(|c| c.id)
    }
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn get_document(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        canonical_url: &str,
    ) -> std::result::Result<Option<DocumentRecord>, RetrievalError> {
        let state = self.state.lock();
        Ok(state
            .documents
            .get(&(site_id, canonical_url.to_string()))
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn upsert_document(
        &self,
        doc: &DocumentRecord,
    ) -> std::result::Result<(), RetrievalError> {
        let mut state = self.state.lock();
        state
            .documents
            .insert((doc.site_id, doc.canonical_url.clone()), doc.clone());
        Ok(())
    }

    async fn list_documents(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
    ) -> std::result::Result<Vec<DocumentRecord>, RetrievalError> {
        let state = self.state.lock();
        let mut docs: Vec<DocumentRecord> = state
            .documents
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.site_id == site_id && !d.is_deleted)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.canonical_url.cmp(&b.canonical_url));
        Ok(docs)
    }

    async fn soft_delete_untouched(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        touched: &[Uuid],
    ) -> std::result::Result<u64, RetrievalError> {
        let touched: HashSet<Uuid> = touched.iter().copied().collect();
        let mut deleted = 0;
        let mut state = self.state.lock();
        for doc in state.documents.values_mut() {
            if doc.tenant_id == tenant_id
                && doc.site_id == site_id
                && !doc.is_deleted
                && !touched.contains(&doc.id)
            {
                doc.is_deleted = true;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn chunk_hashes(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> std::result::Result<HashMap<i32, String>, RetrievalError> {
        let state = self.state.lock();
        Ok(state
            .chunks
            .get(&document_id)
            .map(|chunks| {
                chunks
                    .values()
                    .filter(|c| c.tenant_id == tenant_id)
                    .map(|c| (c.chunk_index, c.content_hash.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_chunks_from(
        &self,
        _tenant_id: Uuid,
        document_id: Uuid,
        first_stale_index: i32,
    ) -> std::result::Result<u64, RetrievalError> {
        let mut state = self.state.lock();
        let mut deleted = 0;
        if let Some(chunks) = state.chunks.get_mut(&document_id) {
            let stale: Vec<i32> =
                chunks.keys().copied().filter(|i| *i >= first_stale_index).collect();
            for index in stale {
                chunks.remove(&index);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn upsert(
        &self,
        chunks: &[(ChunkRecord, EmbeddingRecord)],
    ) -> std::result::Result<UpsertOutcome, RetrievalError> {
        let mut state = self.state.lock();
        let mut outcome = UpsertOutcome::default();

        for (chunk, embedding) in chunks {
            let duplicate = state.chunks.values().any(|by_index| {
                by_index.values().any(|existing| {
                    existing.site_id == chunk.site_id
                        && existing.content_hash == chunk.content_hash
                })
            });
            if duplicate {
                outcome.skipped += 1;
                continue;
            }

            // An occupied (document, index) slot keeps its id on content
            // replacement, matching the store's RETURNING semantics, so
            // the embedding row is rewritten rather than orphaned.
            let mut record = chunk.clone();
            if let Some(existing) = state
                .chunks
                .get(&chunk.document_id)
                .and_then(|by_index| by_index.get(&chunk.chunk_index))
            {
                record.id = existing.id;
            }

            let mut vector = embedding.clone();
            vector.chunk_id = record.id;
            state.embeddings.insert(record.id, vector);
            state
                .chunks
                .entry(chunk.document_id)
                .or_default()
                .insert(chunk.chunk_index, record);
            outcome.inserted += 1;
        }
        Ok(outcome)
    }
}

/// Scriptable crawler driver
pub struct ScriptedDriver {
    pages: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_page(&self, url: &str, content: &str) {
        self.pages.lock().insert(url.to_string(), content.to_string());
    }

    pub fn remove_page(&self, url: &str) {
        self.pages.lock().remove(url);
    }

    pub fn fail_url(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrawlerDriver for ScriptedDriver {
    async fn enumerate(&self, _site_url: &str) -> Result<Vec<String>> {
        let mut urls: Vec<String> = self.pages.lock().keys().cloned().collect();
        urls.extend(self.failing.lock().iter().cloned());
        urls.sort();
        urls.dedup();
        Ok(urls)
    }

    async fn probe(&self, url: &str) -> Result<PageProbe> {
        self.pause().await;
        if self.failing.lock().contains(url) {
            return Err(Error::Transient(format!("probe failed for {}", url)));
        }
        let pages = self.pages.lock();
        let content = pages
            .get(url)
            .ok_or_else(|| Error::Transient(format!("no such page {}", url)))?;
        Ok(PageProbe {
            url: url.to_string(),
            page_hash: content_hash(content),
            lastmod: None,
            etag: None,
        })
    }

    async fn fetch(&self, url: &str) -> Result<CrawledPage> {
        self.pause().await;
        if self.failing.lock().contains(url) {
            return Err(Error::Transient(format!("fetch failed for {}", url)));
        }
        let pages = self.pages.lock();
        let content = pages
            .get(url)
            .ok_or_else(|| Error::Transient(format!("no such page {}", url)))?;
        Ok(CrawledPage {
            url: url.to_string(),
            canonical_url: url.to_string(),
            title: Some("Test page".to_string()),
            content: content.clone(),
            page_hash: content_hash(content),
            locale: None,
            lastmod: None,
            etag: None,
        })
    }
}

/// Deterministic embedding provider
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Spread the content hash over the vector so distinct texts get
        // distinct but reproducible embeddings.
        let hash = content_hash(text);
        let bytes = hash.as_bytes();
        Ok((0..self.dimensions)
            .map(|i| bytes[i % bytes.len()] as f32 / 255.0)
            .collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn model(&self) -> &str {
        "mock-embed"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
