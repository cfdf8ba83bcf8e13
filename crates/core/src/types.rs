//! Tenant-scoped record types
//!
//! Every row that leaves or enters a store carries `tenant_id` and
//! `site_id`. Queries without both are programmer errors, not runtime
//! conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant identifier (always a v4 UUID)
pub type TenantId = Uuid;

/// A crawled page tracked by the indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Document ID
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: Uuid,
    /// Canonical URL, unique per site
    pub canonical_url: String,
    /// Page title
    pub title: Option<String>,
    /// Hash over the extracted content
    pub content_hash: String,
    /// Cheap whole-page hash used for delta detection
    pub page_hash: String,
    /// Last-Modified as reported by the site
    pub lastmod: Option<DateTime<Utc>>,
    /// Time of the last crawl that touched this document
    pub last_crawled: Option<DateTime<Utc>>,
    /// ETag as reported by the site
    pub etag: Option<String>,
    /// BCP-47 locale of the page
    pub locale: Option<String>,
    /// Monotonic version, bumped on every content change
    pub version: i32,
    /// Soft-delete flag set by full crawls
    pub is_deleted: bool,
}

/// Metadata flags extracted from a chunk's markup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Chunk contains JSON-LD / microdata
    #[serde(default)]
    pub has_structured_data: bool,
    /// Chunk contains actionable elements (buttons, links with handlers)
    #[serde(default)]
    pub has_actions: bool,
    /// Chunk contains form fields
    #[serde(default)]
    pub has_forms: bool,
}

/// A unit of content extracted from a document, paired with its embedding
///
/// Chunks are immutable once written; an index delta replaces them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk ID
    pub id: Uuid,
    /// Parent document
    pub document_id: Uuid,
    /// Owning tenant (must equal the document's)
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: Uuid,
    /// Position within the document
    pub chunk_index: i32,
    /// Raw chunk content
    pub content: String,
    /// Content with markup noise stripped, used for lexical ranking
    pub cleaned_content: String,
    /// Hash over `content`; identical hash means identical content
    pub content_hash: String,
    /// Heading path within the document, e.g. `h1>h2>h3`
    pub hpath: Option<String>,
    /// CSS selector locating the chunk in the page
    pub selector: Option<String>,
    /// Word count of `cleaned_content`
    pub word_count: i32,
    /// Approximate token count
    pub token_count: i32,
    /// BCP-47 locale
    pub locale: Option<String>,
    /// Structured-data flags
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Embedding row, 1:1 with a chunk and written in the same transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Owning chunk
    pub chunk_id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: Uuid,
    /// Model that produced the vector
    pub model: String,
    /// Declared dimensionality; must equal `vector.len()`
    pub dimensions: i32,
    /// The embedding vector
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    /// Check the declared dimension against the actual vector length
    pub fn dimension_ok(&self) -> bool {
        self.vector.len() == self.dimensions as usize
    }
}
