//! Incremental crawl and indexing pipeline
//!
//! Features:
//! - Token-bounded text chunking with configurable overlap
//! - Delta, full and selective index sessions driven by page hashes
//! - Batched embedding calls with bounded concurrency and retries
//! - Queue-backed crawl orchestration with cooperative cancellation

pub mod chunker;
pub mod indexer;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use chunker::{ChunkerConfig, ExtractedChunk, TextChunker};
pub use indexer::{
    content_hash, IncrementalIndexer, IndexOutcome, IndexStore, IndexerConfig, LastCrawlInfo,
    SessionKind,
};
pub use orchestrator::{
    CrawlCancelOutcome, CrawlOrchestrator, CrawlRequest, CrawlSessionView, CrawlStats, CrawlStatus,
};

use thiserror::Error;

/// Indexing errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Crawler driver error: {0}")]
    Driver(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("A {mode} crawl is already running for this site")]
    AlreadyRunning { mode: String },

    #[error("Cross-tenant access denied")]
    Forbidden,
}

impl From<sitevoice_retrieval::RetrievalError> for IndexError {
    fn from(err: sitevoice_retrieval::RetrievalError) -> Self {
        IndexError::Store(err.to_string())
    }
}

impl From<IndexError> for sitevoice_core::Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(what) => sitevoice_core::Error::NotFound(what),
            IndexError::AlreadyRunning { mode } => sitevoice_core::Error::AlreadyRunning { mode },
            IndexError::Forbidden => {
                sitevoice_core::Error::Forbidden("session belongs to another tenant".to_string())
            },
            IndexError::Cancelled => sitevoice_core::Error::Transient("session cancelled".to_string()),
            IndexError::Driver(msg) | IndexError::Embedding(msg) => {
                sitevoice_core::Error::Transient(msg)
            },
            IndexError::Store(msg) => sitevoice_core::Error::StoreUnavailable(msg),
        }
    }
}
