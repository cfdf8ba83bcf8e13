//! Crawler driver adapter
//!
//! Page enumeration, probing and content extraction run in an external
//! crawler service; this adapter speaks its JSON API. The indexer only
//! ever sees probe results and extracted text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use sitevoice_core::{CrawledPage, CrawlerDriver, Error, PageProbe, Result};

/// Driver adapter configuration
#[derive(Debug, Clone)]
pub struct HttpCrawlerConfig {
    /// Crawler service endpoint
    pub endpoint: String,
    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for HttpCrawlerConfig {
    fn default() -> Self {
        Self { endpoint: "http://localhost:8091".to_string(), timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Deserialize)]
struct EnumerateResponse {
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeResponse {
    url: String,
    page_hash: String,
    lastmod: Option<DateTime<Utc>>,
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    url: String,
    canonical_url: String,
    title: Option<String>,
    content: String,
    page_hash: String,
    locale: Option<String>,
    lastmod: Option<DateTime<Utc>>,
    etag: Option<String>,
}

/// HTTP adapter to the external crawler service
pub struct HttpCrawlerDriver {
    client: Client,
    config: HttpCrawlerConfig,
}

impl HttpCrawlerDriver {
    pub fn new(config: HttpCrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Crawler client init failed: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, url: &str) -> Result<T> {
        let request_url = format!("{}{}", self.config.endpoint, path);
        let response = self
            .client
            .get(&request_url)
            .query(&[("url", url)])
            .send()
            .await
            .map_err(|e| Error::Transient(format!("Crawler request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "Crawler returned {} for {}",
                response.status(),
                url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Transient(format!("Crawler response parse failed: {}", e)))
    }
}

#[async_trait]
impl CrawlerDriver for HttpCrawlerDriver {
    async fn enumerate(&self, site_url: &str) -> Result<Vec<String>> {
        let parsed: EnumerateResponse = self.get_json("/v1/enumerate", site_url).await?;
        Ok(parsed.urls)
    }

    async fn probe(&self, url: &str) -> Result<PageProbe> {
        let parsed: ProbeResponse = self.get_json("/v1/probe", url).await?;
        Ok(PageProbe {
            url: parsed.url,
            page_hash: parsed.page_hash,
            lastmod: parsed.lastmod,
            etag: parsed.etag,
        })
    }

    async fn fetch(&self, url: &str) -> Result<CrawledPage> {
        let parsed: FetchResponse = self.get_json("/v1/fetch", url).await?;
        Ok(CrawledPage {
            url: parsed.url,
            canonical_url: parsed.canonical_url,
            title: parsed.title,
            content: parsed.content,
            page_hash: parsed.page_hash,
            locale: parsed.locale,
            lastmod: parsed.lastmod,
            etag: parsed.etag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpCrawlerConfig::default();
        assert_eq!(config.endpoint, "http://localhost:8091");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
