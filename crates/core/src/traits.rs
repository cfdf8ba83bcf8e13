//! Traits for pluggable collaborators
//!
//! The engine treats embedding generation, page fetching and realtime
//! speech as external services behind these seams. Capability traits
//! (`HealthCheckable`, `StatsReportable`) replace runtime method probing:
//! a component either implements the capability or it does not.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// External embedding provider returning fixed-dimension float vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts; implementations may cap batch size
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier, recorded on every embedding row
    fn model(&self) -> &str;

    /// Vector dimensionality for this model
    fn dimensions(&self) -> usize;
}

/// Cheap probe result for a single URL
#[derive(Debug, Clone)]
pub struct PageProbe {
    pub url: String,
    /// Whole-page hash used for delta detection
    pub page_hash: String,
    pub lastmod: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// A fully fetched page ready for chunking
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    /// Extracted text content, markup already stripped
    pub content: String,
    pub page_hash: String,
    pub locale: Option<String>,
    pub lastmod: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Driver for page enumeration and fetching
///
/// Implementations own HTML parsing, robots handling and rendering; the
/// indexer only sees probe results and extracted text.
#[async_trait]
pub trait CrawlerDriver: Send + Sync {
    /// Enumerate candidate URLs for a site (sitemap plus known pages)
    async fn enumerate(&self, site_url: &str) -> Result<Vec<String>>;

    /// Probe a URL without fetching the full body
    async fn probe(&self, url: &str) -> Result<PageProbe>;

    /// Fetch and extract a page
    async fn fetch(&self, url: &str) -> Result<CrawledPage>;
}

/// Transport handle to the external realtime speech provider
///
/// The registry owns session identity and metrics; audio processing
/// happens entirely on the provider side.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// Send a text turn into the realtime channel
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Send an audio frame into the realtime channel
    async fn send_audio(&self, audio: &[u8]) -> Result<()>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}

/// Components that can report liveness
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> bool;
}

/// Components that expose a stats snapshot for status endpoints
#[async_trait]
pub trait StatsReportable: Send + Sync {
    async fn stats_snapshot(&self) -> Value;
}
