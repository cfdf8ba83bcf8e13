//! Core traits and types for the retrieval platform
//!
//! This crate provides foundational types used across all other crates:
//! - Tenant/site scoped record types (documents, chunks, embeddings)
//! - Typed filter values with deterministic digests
//! - Error taxonomy shared by every component
//! - Correlation ids and the problem-details payload
//! - Traits for pluggable collaborators (embedding provider, crawler
//!   driver, realtime client)

pub mod correlation;
pub mod error;
pub mod filter;
pub mod problem;
pub mod traits;
pub mod types;

pub use correlation::CorrelationId;
pub use error::{Error, Result};
pub use filter::{FilterValue, Filters};
pub use problem::ProblemDetails;
pub use traits::{
    CrawledPage, CrawlerDriver, EmbeddingProvider, HealthCheckable, PageProbe, RealtimeClient,
    StatsReportable,
};
pub use types::{
    ChunkMetadata, ChunkRecord, DocumentRecord, EmbeddingRecord, TenantId,
};
