//! Vector store over Postgres + pgvector
//!
//! Owns chunk/embedding persistence and every similarity or lexical
//! query. All SQL carries tenant and site equality predicates; a query
//! without them cannot be expressed through this API.

use std::collections::HashMap;

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use sitevoice_core::{ChunkMetadata, ChunkRecord, DocumentRecord, EmbeddingRecord};

use crate::RetrievalError;

/// ANN index kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Hnsw,
    IvfFlat,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Hnsw => "hnsw",
            IndexKind::IvfFlat => "ivfflat",
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Postgres connection string
    pub database_url: String,
    /// Maximum pool connections
    pub max_connections: u32,
    /// Warm connections to keep open
    pub min_connections: u32,
    /// Pool acquire timeout in seconds
    pub acquire_timeout_secs: u64,
    /// Embedding dimensionality, fixed per deployment model
    pub dimensions: usize,
    /// `hnsw.ef_search` session value for indexed queries
    pub ef_search: u32,
    /// `ivfflat.probes` session value for indexed queries
    pub probes: u32,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/sitevoice".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 5,
            dimensions: 1536,
            ef_search: 80,
            probes: 10,
        }
    }
}

/// One strategy result row
#[derive(Debug, Clone)]
pub struct Hit {
    /// Chunk id
    pub id: Uuid,
    /// Owning document
    pub page_id: Uuid,
    /// Position within the document
    pub chunk_index: i32,
    /// Cosine distance (vector strategy only)
    pub distance: Option<f32>,
    /// Strategy score; for the vector strategy this is `1 - distance`
    pub score: f32,
    /// Chunk content for snippet extraction
    pub content: String,
    /// Canonical URL of the page
    pub url: String,
    /// Page title
    pub title: Option<String>,
    /// Structured-data flags
    pub metadata: ChunkMetadata,
}

/// Common query scope shared by every strategy
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    /// Filter to a locale; absent means any
    pub locale: Option<String>,
    /// Candidate cap, typically twice the requested top-k
    pub limit: usize,
    /// Applied on the converted score, not the raw distance
    pub min_score: Option<f32>,
    /// ANN index session parameters to apply
    pub use_index: Option<IndexKind>,
}

/// Outcome of an upsert batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Chunks skipped because `(site_id, content_hash)` already exists
    pub skipped: usize,
}

/// Store statistics for the status endpoint
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub document_count: i64,
    pub chunk_count: i64,
    pub embedding_count: i64,
    pub index_kind: Option<IndexKind>,
    pub avg_chunk_tokens: f64,
}

/// Postgres-backed vector store
pub struct VectorStore {
    pool: PgPool,
    config: VectorStoreConfig,
}

impl VectorStore {
    /// Connect and build the pool
    pub async fn connect(config: VectorStoreConfig) -> Result<Self, RetrievalError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| RetrievalError::Store(format!("Failed to connect to Postgres: {}", e)))?;

        Ok(Self { pool, config })
    }

    /// Wrap an existing pool (tests, shared pools)
    pub fn with_pool(pool: PgPool, config: VectorStoreConfig) -> Self {
        Self { pool, config }
    }

    /// Pool reference for advanced callers
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and secondary indexes if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), RetrievalError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        let documents = r#"
            CREATE TABLE IF NOT EXISTS kb_documents (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                site_id UUID NOT NULL,
                canonical_url TEXT NOT NULL,
                title TEXT,
                content_hash TEXT NOT NULL,
                page_hash TEXT NOT NULL,
                lastmod TIMESTAMPTZ,
                last_crawled TIMESTAMPTZ,
                etag TEXT,
                locale TEXT,
                version INT NOT NULL DEFAULT 1,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (site_id, canonical_url)
            )
        "#;
        sqlx::query(documents).execute(&self.pool).await?;

        let chunks = r#"
            CREATE TABLE IF NOT EXISTS kb_chunks (
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES kb_documents(id) ON DELETE CASCADE,
                tenant_id UUID NOT NULL,
                site_id UUID NOT NULL,
                chunk_index INT NOT NULL,
                content TEXT NOT NULL,
                cleaned_content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                hpath TEXT,
                selector TEXT,
                word_count INT NOT NULL,
                token_count INT NOT NULL,
                locale TEXT,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (document_id, chunk_index)
            )
        "#;
        sqlx::query(chunks).execute(&self.pool).await?;

        let embeddings = format!(
            r#"
            CREATE TABLE IF NOT EXISTS kb_embeddings (
                chunk_id UUID PRIMARY KEY REFERENCES kb_chunks(id) ON DELETE CASCADE,
                tenant_id UUID NOT NULL,
                site_id UUID NOT NULL,
                model TEXT NOT NULL,
                dimensions INT NOT NULL,
                vector vector({dims}) NOT NULL
            )
        "#,
            dims = self.config.dimensions
        );
        sqlx::query(&embeddings).execute(&self.pool).await?;

        let secondary = [
            "CREATE INDEX IF NOT EXISTS idx_kb_documents_tenant_site ON kb_documents (tenant_id, site_id)",
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_tenant_site ON kb_chunks (tenant_id, site_id)",
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_site_hash ON kb_chunks (site_id, content_hash)",
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_locale ON kb_chunks (tenant_id, locale)",
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_fts ON kb_chunks USING GIN (to_tsvector('simple', cleaned_content))",
        ];
        for statement in secondary {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!(dimensions = self.config.dimensions, "Vector store schema ensured");
        Ok(())
    }

    // ---- documents -------------------------------------------------------

    /// Insert or update a document row
    pub async fn upsert_document(&self, doc: &DocumentRecord) -> Result<(), RetrievalError> {
        sqlx::query(
            r#"
            INSERT INTO kb_documents
                (id, tenant_id, site_id, canonical_url, title, content_hash, page_hash,
                 lastmod, last_crawled, etag, locale, version, is_deleted, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
            ON CONFLICT (site_id, canonical_url) DO UPDATE SET
                title = EXCLUDED.title,
                content_hash = EXCLUDED.content_hash,
                page_hash = EXCLUDED.page_hash,
                lastmod = EXCLUDED.lastmod,
                last_crawled = EXCLUDED.last_crawled,
                etag = EXCLUDED.etag,
                locale = EXCLUDED.locale,
                version = EXCLUDED.version,
                is_deleted = EXCLUDED.is_deleted,
                updated_at = now()
            "#,
        )
        .bind(doc.id)
        .bind(doc.tenant_id)
        .bind(doc.site_id)
        .bind(&doc.canonical_url)
        .bind(&doc.title)
        .bind(&doc.content_hash)
        .bind(&doc.page_hash)
        .bind(doc.lastmod)
        .bind(doc.last_crawled)
        .bind(&doc.etag)
        .bind(&doc.locale)
        .bind(doc.version)
        .bind(doc.is_deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a document by its site-unique URL
    pub async fn get_document(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        canonical_url: &str,
    ) -> Result<Option<DocumentRecord>, RetrievalError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, site_id, canonical_url, title, content_hash, page_hash,
                   lastmod, last_crawled, etag, locale, version, is_deleted
            FROM kb_documents
            WHERE tenant_id = $1 AND site_id = $2 AND canonical_url = $3
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .bind(canonical_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_document(&r)).transpose()
    }

    /// List non-deleted documents for a site
    pub async fn list_documents(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
    ) -> Result<Vec<DocumentRecord>, RetrievalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, site_id, canonical_url, title, content_hash, page_hash,
                   lastmod, last_crawled, etag, locale, version, is_deleted
            FROM kb_documents
            WHERE tenant_id = $1 AND site_id = $2 AND is_deleted = FALSE
            ORDER BY canonical_url
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    /// Soft-delete site documents a full sweep did not touch
    pub async fn soft_delete_untouched(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        touched: &[Uuid],
    ) -> Result<u64, RetrievalError> {
        let result = sqlx::query(
            r#"
            UPDATE kb_documents
            SET is_deleted = TRUE, updated_at = now()
            WHERE tenant_id = $1 AND site_id = $2
              AND is_deleted = FALSE
              AND NOT (id = ANY($3))
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .bind(touched)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---- chunks + embeddings ---------------------------------------------

    /// Idempotent chunk + embedding upsert
    ///
    /// A chunk whose `(site_id, content_hash)` already exists is skipped
    /// entirely. New or changed chunks replace the row content at their
    /// `(document_id, chunk_index)` slot while the slot keeps its id, so
    /// the embedding foreign key stays valid; the embedding is written to
    /// the surviving id in the same transaction, so readers never observe
    /// a chunk without its vector.
    pub async fn upsert(
        &self,
        chunks: &[(ChunkRecord, EmbeddingRecord)],
    ) -> Result<UpsertOutcome, RetrievalError> {
        for (chunk, embedding) in chunks {
            if chunk.tenant_id != embedding.tenant_id {
                return Err(RetrievalError::Store(format!(
                    "Chunk {} and embedding disagree on tenant",
                    chunk.id
                )));
            }
            if !embedding.dimension_ok() || embedding.vector.len() != self.config.dimensions {
                return Err(RetrievalError::DimensionMismatch {
                    got: embedding.vector.len(),
                    expected: self.config.dimensions,
                });
            }
        }

        let mut outcome = UpsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        for (chunk, embedding) in chunks {
            let exists: Option<(Uuid,)> = sqlx::query_as(
                "SELECT id FROM kb_chunks WHERE tenant_id = $1 AND site_id = $2 AND content_hash = $3 LIMIT 1",
            )
            .bind(chunk.tenant_id)
            .bind(chunk.site_id)
            .bind(&chunk.content_hash)
            .fetch_optional(&mut *tx)
            .await?;

            if exists.is_some() {
                outcome.skipped += 1;
                continue;
            }

            let metadata = serde_json::to_value(&chunk.metadata)
                .map_err(|e| RetrievalError::Store(format!("Metadata encode failed: {}", e)))?;

            // The conflict arm must not touch `id`: kb_embeddings.chunk_id
            // references it without ON UPDATE CASCADE, so rewriting the key
            // under a live embedding row would fail the transaction.
            // RETURNING hands back the surviving id either way.
            let (chunk_id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO kb_chunks
                    (id, document_id, tenant_id, site_id, chunk_index, content, cleaned_content,
                     content_hash, hpath, selector, word_count, token_count, locale, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                    content = EXCLUDED.content,
                    cleaned_content = EXCLUDED.cleaned_content,
                    content_hash = EXCLUDED.content_hash,
                    hpath = EXCLUDED.hpath,
                    selector = EXCLUDED.selector,
                    word_count = EXCLUDED.word_count,
                    token_count = EXCLUDED.token_count,
                    locale = EXCLUDED.locale,
                    metadata = EXCLUDED.metadata
                RETURNING id
                "#,
            )
            .bind(chunk.id)
            .bind(chunk.document_id)
            .bind(chunk.tenant_id)
            .bind(chunk.site_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.cleaned_content)
            .bind(&chunk.content_hash)
            .bind(&chunk.hpath)
            .bind(&chunk.selector)
            .bind(chunk.word_count)
            .bind(chunk.token_count)
            .bind(&chunk.locale)
            .bind(metadata)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO kb_embeddings (chunk_id, tenant_id, site_id, model, dimensions, vector)
                VALUES ($1, $2, $3, $4, $5, $6::vector)
                ON CONFLICT (chunk_id) DO UPDATE SET
                    model = EXCLUDED.model,
                    dimensions = EXCLUDED.dimensions,
                    vector = EXCLUDED.vector
                "#,
            )
            .bind(chunk_id)
            .bind(embedding.tenant_id)
            .bind(embedding.site_id)
            .bind(&embedding.model)
            .bind(embedding.dimensions)
            .bind(vector_literal(&embedding.vector))
            .execute(&mut *tx)
            .await?;

            outcome.inserted += 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Chunk fingerprints stored under a document, for delta diffing
    pub async fn chunk_hashes(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<HashMap<i32, String>, RetrievalError> {
        let rows = sqlx::query(
            "SELECT chunk_index, content_hash FROM kb_chunks WHERE tenant_id = $1 AND document_id = $2",
        )
        .bind(tenant_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hashes = HashMap::with_capacity(rows.len());
        for row in rows {
            let index: i32 = row.try_get("chunk_index")?;
            let hash: String = row.try_get("content_hash")?;
            hashes.insert(index, hash);
        }
        Ok(hashes)
    }

    /// Delete chunks of a document past a given index (stale tail after a delta)
    pub async fn delete_chunks_from(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        first_stale_index: i32,
    ) -> Result<u64, RetrievalError> {
        let result = sqlx::query(
            "DELETE FROM kb_chunks WHERE tenant_id = $1 AND document_id = $2 AND chunk_index >= $3",
        )
        .bind(tenant_id)
        .bind(document_id)
        .bind(first_stale_index)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete all chunks and embeddings of a document
    pub async fn delete_by_page(
        &self,
        page_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<u64, RetrievalError> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("DELETE FROM kb_chunks WHERE document_id = $1 AND tenant_id = $2")
                .bind(page_id)
                .bind(tenant_id)
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    // ---- search strategies -----------------------------------------------

    /// Nearest-neighbour search over chunk embeddings
    ///
    /// Results are ordered by ascending cosine distance with a
    /// `(chunk_index, id)` tiebreak so equal-distance rows come back in
    /// the same order on every call.
    pub async fn nn_search(
        &self,
        query: &CandidateQuery,
        embedding: &[f32],
    ) -> Result<Vec<Hit>, RetrievalError> {
        if embedding.len() != self.config.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                got: embedding.len(),
                expected: self.config.dimensions,
            });
        }

        let mut tx = self.pool.begin().await?;
        match query.use_index {
            Some(IndexKind::Hnsw) => {
                sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", self.config.ef_search))
                    .execute(&mut *tx)
                    .await?;
            },
            Some(IndexKind::IvfFlat) => {
                sqlx::query(&format!("SET LOCAL ivfflat.probes = {}", self.config.probes))
                    .execute(&mut *tx)
                    .await?;
            },
            None => {},
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.canonical_url, d.title,
                   (e.vector <=> $1::vector)::float4 AS distance
            FROM kb_chunks c
            JOIN kb_embeddings e ON e.chunk_id = c.id
            JOIN kb_documents d ON d.id = c.document_id
            WHERE c.tenant_id = $2 AND c.site_id = $3
              AND d.is_deleted = FALSE
              AND ($4::text IS NULL OR c.locale = $4)
            ORDER BY distance ASC, c.chunk_index ASC, c.id ASC
            LIMIT $5
            "#,
        )
        .bind(vector_literal(embedding))
        .bind(query.tenant_id)
        .bind(query.site_id)
        .bind(&query.locale)
        .bind(query.limit as i64)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let distance: f32 = row.try_get("distance")?;
            let score = distance_to_score(distance);
            if let Some(min_score) = query.min_score {
                if score < min_score {
                    continue;
                }
            }
            hits.push(row_to_hit(row, Some(distance), score)?);
        }
        Ok(hits)
    }

    /// Lexical rank over tokenised content
    pub async fn fulltext_search(
        &self,
        query: &CandidateQuery,
        text: &str,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.canonical_url, d.title,
                   ts_rank(to_tsvector('simple', c.cleaned_content),
                           plainto_tsquery('simple', $1))::float4 AS rank
            FROM kb_chunks c
            JOIN kb_documents d ON d.id = c.document_id
            WHERE c.tenant_id = $2 AND c.site_id = $3
              AND d.is_deleted = FALSE
              AND ($4::text IS NULL OR c.locale = $4)
              AND to_tsvector('simple', c.cleaned_content) @@ plainto_tsquery('simple', $1)
            ORDER BY rank DESC, c.chunk_index ASC, c.id ASC
            LIMIT $5
            "#,
        )
        .bind(text)
        .bind(query.tenant_id)
        .bind(query.site_id)
        .bind(&query.locale)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let rank: f32 = row.try_get("rank")?;
                row_to_hit(row, None, rank)
            })
            .collect()
    }

    /// Term-occurrence scoring with document-length normalisation
    ///
    /// Chunks matching none of the terms are excluded.
    pub async fn bm25_search(
        &self,
        query: &CandidateQuery,
        terms: &[String],
    ) -> Result<Vec<Hit>, RetrievalError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.canonical_url, d.title,
                   (occ.hits / (1.0 + ln(1 + c.word_count)))::float4 AS score
            FROM kb_chunks c
            JOIN kb_documents d ON d.id = c.document_id
            CROSS JOIN LATERAL (
                SELECT COALESCE(SUM(
                    (length(lower(c.cleaned_content))
                     - length(replace(lower(c.cleaned_content), t.term, '')))
                    / GREATEST(length(t.term), 1)
                ), 0)::float8 AS hits
                FROM unnest($1::text[]) AS t(term)
            ) occ
            WHERE c.tenant_id = $2 AND c.site_id = $3
              AND d.is_deleted = FALSE
              AND ($4::text IS NULL OR c.locale = $4)
              AND occ.hits > 0
            ORDER BY score DESC, c.chunk_index ASC, c.id ASC
            LIMIT $5
            "#,
        )
        .bind(&lowered)
        .bind(query.tenant_id)
        .bind(query.site_id)
        .bind(&query.locale)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let score: f32 = row.try_get("score")?;
                row_to_hit(row, None, score)
            })
            .collect()
    }

    /// FTS restricted to chunks with structured-data flags
    ///
    /// Structured data weighs 2.0, actions 1.8, forms 1.6; the strongest
    /// present flag decides the boost.
    pub async fn structured_search(
        &self,
        query: &CandidateQuery,
        text: &str,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.canonical_url, d.title,
                   (ts_rank(to_tsvector('simple', c.cleaned_content),
                            plainto_tsquery('simple', $1))
                    * CASE
                        WHEN COALESCE((c.metadata->>'has_structured_data')::boolean, FALSE) THEN 2.0
                        WHEN COALESCE((c.metadata->>'has_actions')::boolean, FALSE) THEN 1.8
                        ELSE 1.6
                      END)::float4 AS score
            FROM kb_chunks c
            JOIN kb_documents d ON d.id = c.document_id
            WHERE c.tenant_id = $2 AND c.site_id = $3
              AND d.is_deleted = FALSE
              AND ($4::text IS NULL OR c.locale = $4)
              AND (COALESCE((c.metadata->>'has_structured_data')::boolean, FALSE)
                   OR COALESCE((c.metadata->>'has_actions')::boolean, FALSE)
                   OR COALESCE((c.metadata->>'has_forms')::boolean, FALSE))
              AND to_tsvector('simple', c.cleaned_content) @@ plainto_tsquery('simple', $1)
            ORDER BY score DESC, c.chunk_index ASC, c.id ASC
            LIMIT $5
            "#,
        )
        .bind(text)
        .bind(query.tenant_id)
        .bind(query.site_id)
        .bind(&query.locale)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let score: f32 = row.try_get("score")?;
                row_to_hit(row, None, score)
            })
            .collect()
    }

    /// Database-side hybrid fusion of vector and FTS ranks
    ///
    /// Low-level hot path; the orchestrating engine is the normal entry
    /// point. `alpha` weighs the vector list, `1 - alpha` the lexical one.
    pub async fn hybrid_search(
        &self,
        query: &CandidateQuery,
        embedding: &[f32],
        text: &str,
        alpha: f64,
    ) -> Result<Vec<Hit>, RetrievalError> {
        if embedding.len() != self.config.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                got: embedding.len(),
                expected: self.config.dimensions,
            });
        }

        let rows = sqlx::query(
            r#"
            WITH vec AS (
                SELECT c.id, ROW_NUMBER() OVER (
                    ORDER BY e.vector <=> $1::vector, c.chunk_index, c.id
                ) AS r
                FROM kb_chunks c
                JOIN kb_embeddings e ON e.chunk_id = c.id
                JOIN kb_documents d ON d.id = c.document_id
                WHERE c.tenant_id = $3 AND c.site_id = $4 AND d.is_deleted = FALSE
                  AND ($5::text IS NULL OR c.locale = $5)
                LIMIT $6
            ),
            fts AS (
                SELECT c.id, ROW_NUMBER() OVER (
                    ORDER BY ts_rank(to_tsvector('simple', c.cleaned_content),
                                     plainto_tsquery('simple', $2)) DESC,
                             c.chunk_index, c.id
                ) AS r
                FROM kb_chunks c
                JOIN kb_documents d ON d.id = c.document_id
                WHERE c.tenant_id = $3 AND c.site_id = $4 AND d.is_deleted = FALSE
                  AND ($5::text IS NULL OR c.locale = $5)
                  AND to_tsvector('simple', c.cleaned_content) @@ plainto_tsquery('simple', $2)
                LIMIT $6
            ),
            fused AS (
                SELECT COALESCE(vec.id, fts.id) AS id,
                       COALESCE($7 / (60 + vec.r), 0)
                       + COALESCE((1 - $7) / (60 + fts.r), 0) AS score
                FROM vec FULL OUTER JOIN fts USING (id)
            )
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.canonical_url, d.title, fused.score::float4 AS score
            FROM fused
            JOIN kb_chunks c ON c.id = fused.id
            JOIN kb_documents d ON d.id = c.document_id
            ORDER BY fused.score DESC, c.chunk_index ASC, c.id ASC
            LIMIT $8
            "#,
        )
        .bind(vector_literal(embedding))
        .bind(text)
        .bind(query.tenant_id)
        .bind(query.site_id)
        .bind(&query.locale)
        .bind((query.limit * 2) as i64)
        .bind(alpha)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let score: f32 = row.try_get("score")?;
                row_to_hit(row, None, score)
            })
            .collect()
    }

    // ---- index management ------------------------------------------------

    /// Build the ANN index for the given kind; idempotent by name
    pub async fn reindex(&self, kind: IndexKind) -> Result<(), RetrievalError> {
        let statement = match kind {
            IndexKind::Hnsw => {
                "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_kb_embeddings_vector_hnsw \
                 ON kb_embeddings USING hnsw (vector vector_cosine_ops) \
                 WITH (m = 16, ef_construction = 64)"
                    .to_string()
            },
            IndexKind::IvfFlat => {
                let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kb_embeddings")
                    .fetch_one(&self.pool)
                    .await?;
                let lists = ivfflat_lists(rows.0);
                format!(
                    "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_kb_embeddings_vector_ivfflat \
                     ON kb_embeddings USING ivfflat (vector vector_cosine_ops) \
                     WITH (lists = {})",
                    lists
                )
            },
        };

        sqlx::query(&statement).execute(&self.pool).await?;
        tracing::info!(kind = kind.as_str(), "ANN index ensured");
        Ok(())
    }

    /// Detect the active ANN index kind from index definitions
    pub async fn active_index(&self) -> Result<Option<IndexKind>, RetrievalError> {
        let rows = sqlx::query(
            "SELECT indexdef FROM pg_indexes WHERE tablename = 'kb_embeddings'",
        )
        .fetch_all(&self.pool)
        .await?;

        let definitions: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String, _>("indexdef"))
            .collect::<Result<_, _>>()?;
        Ok(detect_index_kind(&definitions))
    }

    /// Tenant-scoped statistics for the status endpoint
    pub async fn stats(
        &self,
        tenant_id: Uuid,
        site_id: Option<Uuid>,
    ) -> Result<StoreStats, RetrievalError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM kb_documents
                 WHERE tenant_id = $1 AND ($2::uuid IS NULL OR site_id = $2)
                   AND is_deleted = FALSE) AS documents,
                (SELECT COUNT(*) FROM kb_chunks
                 WHERE tenant_id = $1 AND ($2::uuid IS NULL OR site_id = $2)) AS chunks,
                (SELECT COUNT(*) FROM kb_embeddings
                 WHERE tenant_id = $1 AND ($2::uuid IS NULL OR site_id = $2)) AS embeddings,
                (SELECT COALESCE(AVG(token_count), 0)::float8 FROM kb_chunks
                 WHERE tenant_id = $1 AND ($2::uuid IS NULL OR site_id = $2)) AS avg_tokens
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            document_count: row.try_get("documents")?,
            chunk_count: row.try_get("chunks")?,
            embedding_count: row.try_get("embeddings")?,
            index_kind: self.active_index().await?,
            avg_chunk_tokens: row.try_get("avg_tokens")?,
        })
    }

    /// Cheap connectivity probe for readiness checks
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait::async_trait]
impl sitevoice_core::HealthCheckable for VectorStore {
    async fn health_check(&self) -> bool {
        self.ping().await
    }
}

// ---- pure helpers --------------------------------------------------------

/// Convert cosine distance to a similarity score
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 - distance
}

/// IVFFlat list count for a row count: rows/1000 clamped to [100, 1000]
pub fn ivfflat_lists(rows: i64) -> i64 {
    (rows / 1000).clamp(100, 1000)
}

/// pgvector text literal, e.g. `[0.1,0.2]`
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{}", value));
    }
    out.push(']');
    out
}

/// Pick the active ANN index kind from index definitions, HNSW first
pub fn detect_index_kind(definitions: &[String]) -> Option<IndexKind> {
    if definitions.iter().any(|d| d.contains("hnsw")) {
        Some(IndexKind::Hnsw)
    } else if definitions.iter().any(|d| d.contains("ivfflat")) {
        Some(IndexKind::IvfFlat)
    } else {
        None
    }
}

fn row_to_hit(row: &PgRow, distance: Option<f32>, score: f32) -> Result<Hit, RetrievalError> {
    let metadata_json: serde_json::Value = row.try_get("metadata")?;
    let metadata: ChunkMetadata = serde_json::from_value(metadata_json).unwrap_or_default();

    Ok(Hit {
        id: row.try_get("id")?,
        page_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        distance,
        score,
        content: row.try_get("content")?,
        url: row.try_get("canonical_url")?,
        title: row.try_get("title")?,
        metadata,
    })
}

fn row_to_document(row: &PgRow) -> Result<DocumentRecord, RetrievalError> {
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        site_id: row.try_get("site_id")?,
        canonical_url: row.try_get("canonical_url")?,
        title: row.try_get("title")?,
        content_hash: row.try_get("content_hash")?,
        page_hash: row.try_get("page_hash")?,
        lastmod: row.try_get("lastmod")?,
        last_crawled: row.try_get("last_crawled")?,
        etag: row.try_get("etag")?,
        locale: row.try_get("locale")?,
        version: row.try_get("version")?,
        is_deleted: row.try_get("is_deleted")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ivfflat_lists_clamping() {
        assert_eq!(ivfflat_lists(0), 100);
        assert_eq!(ivfflat_lists(50_000), 100);
        assert_eq!(ivfflat_lists(500_000), 500);
        assert_eq!(ivfflat_lists(5_000_000), 1000);
    }

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[1.0, 0.0, 0.5]), "[1,0,0.5]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_distance_to_score() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert!((distance_to_score(0.25) - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_detect_index_kind_prefers_hnsw() {
        let defs = vec![
            "CREATE INDEX idx ON kb_embeddings USING ivfflat (vector)".to_string(),
            "CREATE INDEX idx2 ON kb_embeddings USING hnsw (vector)".to_string(),
        ];
        assert_eq!(detect_index_kind(&defs), Some(IndexKind::Hnsw));

        let defs = vec!["CREATE INDEX idx ON kb_embeddings USING ivfflat (vector)".to_string()];
        assert_eq!(detect_index_kind(&defs), Some(IndexKind::IvfFlat));

        let defs = vec!["CREATE UNIQUE INDEX pk ON kb_embeddings (chunk_id)".to_string()];
        assert_eq!(detect_index_kind(&defs), None);
    }
}
