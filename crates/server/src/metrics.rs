//! Prometheus metrics
//!
//! Thin helpers over the `metrics` facade so call sites stay terse and
//! metric names live in one place.

use axum::extract::State;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the Prometheus recorder and return its render handle
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder already installed or failed");
            None
        },
    }
}

/// Record one search request
pub fn record_search(cache: &str, degraded: bool, duration_ms: u64) {
    metrics::counter!("sitevoice_search_requests_total", "cache" => cache.to_string())
        .increment(1);
    if degraded {
        metrics::counter!("sitevoice_search_degraded_total").increment(1);
    }
    metrics::histogram!("sitevoice_search_duration_ms").record(duration_ms as f64);
}

/// Record a voice session lifecycle event
pub fn record_voice_session(event: &str) {
    metrics::counter!("sitevoice_voice_sessions_total", "event" => event.to_string())
        .increment(1);
}

/// Record a rate limit rejection
pub fn record_rate_limited() {
    metrics::counter!("sitevoice_rate_limited_total").increment(1);
}

/// Render the Prometheus exposition text
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    match state.metrics_handle() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
