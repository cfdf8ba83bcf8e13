//! Application state
//!
//! The composition root builds this graph once at startup; components
//! receive their dependencies explicitly instead of reaching for
//! process-wide singletons. Retrieval pieces are optional so the
//! service can come up degraded while the database is unavailable.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use sitevoice_config::Settings;
use sitevoice_guard::{InMemoryRateLimitStore, LocaleNegotiator, RateLimiter, RateLimiterConfig};
use sitevoice_index::CrawlOrchestrator;
use sitevoice_retrieval::{HybridSearchEngine, VectorStore};
use sitevoice_voice::{RegistryConfig, VoiceSessionRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Immutable settings snapshot taken at startup
    pub settings: Arc<Settings>,
    /// Hybrid search engine; absent while the store is down
    pub engine: Option<Arc<HybridSearchEngine>>,
    /// Vector store handle for status/readiness
    pub store: Option<Arc<VectorStore>>,
    /// Crawl orchestrator; absent while the store is down
    pub orchestrator: Option<Arc<CrawlOrchestrator>>,
    /// Voice session registry
    pub voice: Arc<VoiceSessionRegistry>,
    /// Request-path rate limiter
    pub limiter: Arc<RateLimiter>,
    /// Locale negotiation over the configured supported set
    pub locales: Arc<LocaleNegotiator>,
    /// Prometheus render handle; absent when the recorder is disabled
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build state without retrieval backends (degraded or test mode)
    pub fn new(settings: Settings) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            RateLimiterConfig::from(&settings.rate_limit),
        ));
        let locales = Arc::new(LocaleNegotiator::new(
            settings.locale.supported.clone(),
            settings.locale.default.clone(),
        ));
        let voice = Arc::new(VoiceSessionRegistry::new(RegistryConfig {
            max_sessions: settings.voice.max_sessions,
            sweep_interval: std::time::Duration::from_secs(settings.voice.sweep_interval_secs),
        }));

        Self {
            settings: Arc::new(settings),
            engine: None,
            store: None,
            orchestrator: None,
            voice,
            limiter,
            locales,
            metrics: None,
        }
    }

    /// Attach the retrieval engine
    pub fn with_engine(mut self, engine: Arc<HybridSearchEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Attach the vector store handle
    pub fn with_store(mut self, store: Arc<VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the crawl orchestrator
    pub fn with_orchestrator(mut self, orchestrator: Arc<CrawlOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Attach the Prometheus render handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Prometheus render handle, when metrics are enabled
    pub fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }

    /// Search engine or a degraded-mode error
    pub fn engine(&self) -> Result<&Arc<HybridSearchEngine>, sitevoice_core::Error> {
        self.engine.as_ref().ok_or_else(|| {
            sitevoice_core::Error::SearchUnavailable("retrieval store is offline".to_string())
        })
    }

    /// Orchestrator or a degraded-mode error
    pub fn orchestrator(&self) -> Result<&Arc<CrawlOrchestrator>, sitevoice_core::Error> {
        self.orchestrator.as_ref().ok_or_else(|| {
            sitevoice_core::Error::StoreUnavailable("indexing store is offline".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_state_has_no_engine() {
        let state = AppState::new(Settings::default());
        assert!(state.engine().is_err());
        assert!(state.orchestrator().is_err());
        assert_eq!(state.voice.status().active_sessions, 0);
    }
}
