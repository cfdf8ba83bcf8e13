//! Hybrid retrieval engine
//!
//! Features:
//! - Tenant-isolated chunk + embedding persistence over Postgres/pgvector
//! - ANN, full-text, BM25-style and structured-data search strategies
//! - Reciprocal Rank Fusion across strategies
//! - Stale-while-revalidate result cache with coalesced revalidation
//! - HTTP embedding provider client
//! - Per-strategy fallback orchestration

pub mod cache;
pub mod embedding;
pub mod engine;
pub mod fusion;
pub mod store;

pub use cache::{CacheLookup, CacheStats, ClearOutcome, RetrievalCache, SwrPolicy};
pub use embedding::{HttpEmbeddingConfig, HttpEmbeddingProvider};
pub use engine::{
    CacheStatus, EngineConfig, FusionMeta, HybridSearchEngine, SearchBackend, SearchMatch,
    SearchOutcome, SearchRequest, SearchResponse, SearchStrategy,
};
pub use fusion::{fuse, FuseOptions, FusedItem, RankedItem, RankedList};
pub use store::{
    CandidateQuery, Hit, IndexKind, StoreStats, UpsertOutcome, VectorStore, VectorStoreConfig,
};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("Search error: {0}")]
    Search(String),

    #[error("Search unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<sqlx::Error> for RetrievalError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                RetrievalError::Transient(err.to_string())
            },
            _ => RetrievalError::Store(err.to_string()),
        }
    }
}

impl From<RetrievalError> for sitevoice_core::Error {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::DimensionMismatch { got, expected } => {
                sitevoice_core::Error::DimensionMismatch { got, expected }
            },
            RetrievalError::Transient(msg) => sitevoice_core::Error::Transient(msg),
            RetrievalError::Unavailable(msg) => sitevoice_core::Error::SearchUnavailable(msg),
            RetrievalError::InvalidRequest(msg) => sitevoice_core::Error::Validation(msg),
            RetrievalError::Store(msg) => sitevoice_core::Error::StoreUnavailable(msg),
            RetrievalError::Embedding(msg) | RetrievalError::Search(msg) => {
                sitevoice_core::Error::Internal(msg)
            },
        }
    }
}
