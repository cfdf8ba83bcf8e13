//! HTTP embedding provider client
//!
//! Talks to an external embedding service returning fixed-dimension
//! float vectors. The engine never generates vectors itself.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use sitevoice_core::{EmbeddingProvider, Error, Result};

/// Embedding client configuration
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// Provider endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Vector dimensionality
    pub dimensions: usize,
    /// Maximum texts per batch call
    pub batch_size: usize,
    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 100,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Request to the embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response from the embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedding provider
pub struct HttpEmbeddingProvider {
    client: Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingProvider {
    /// Create a new provider client
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Embedding client init failed: {}", e)))?;
        Ok(Self { client, config })
    }

    /// One API round-trip for up to `batch_size` texts
    async fn embed_call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest { model: &self.config.model, input: texts };
        let url = format!("{}/api/embed", self.config.endpoint);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transient(format!(
                "Embedding provider returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Transient(format!("Embedding response parse failed: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::Transient(format!(
                "Embedding provider returned {} vectors for {} texts",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        for vector in &parsed.embeddings {
            if vector.len() != self.config.dimensions {
                return Err(Error::DimensionMismatch {
                    got: vector.len(),
                    expected: self.config.dimensions,
                });
            }
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_call(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Transient("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            vectors.extend(self.embed_call(batch).await?);
        }
        Ok(vectors)
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpEmbeddingConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.dimensions, 1536);
    }

    #[test]
    fn test_provider_exposes_model_metadata() {
        let provider = HttpEmbeddingProvider::new(HttpEmbeddingConfig {
            model: "test-embed".to_string(),
            dimensions: 4,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.model(), "test-embed");
        assert_eq!(provider.dimensions(), 4);
    }
}
