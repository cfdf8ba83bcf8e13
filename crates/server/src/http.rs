//! Router assembly

use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use sitevoice_guard::correlation_middleware;

use crate::metrics::metrics_handler;
use crate::middleware::rate_limit_middleware;
use crate::routes::{kb, meta, voice};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    let api = Router::new()
        // Knowledge base
        .route("/kb/search", post(kb::search))
        .route("/kb/reindex", post(kb::reindex))
        .route("/kb/status", get(kb::status))
        .route("/kb/health", get(kb::health))
        // Voice sessions
        .route("/voice/session", post(voice::create_session))
        .route("/voice/session/:id", delete(voice::end_session))
        .route("/voice/stream", get(voice::stream_sse).post(voice::stream_input))
        .route("/voice/health", get(voice::health));

    Router::new()
        .nest("/api/v1", api)
        // Discovery and probes
        .route("/info", get(meta::info))
        .route("/openapi.json", get(meta::openapi))
        .route("/health", get(meta::liveness))
        .route("/ready", get(meta::readiness))
        // Legacy path
        .route(
            "/api/search",
            get(meta::legacy_search_redirect).post(meta::legacy_search_redirect),
        )
        // Prometheus
        .route("/metrics", get(metrics_handler))
        // Middleware: correlation wraps rate limiting so rejections carry
        // the correlation id. The timeout layer bounds every request;
        // derived work inherits the shorter per-strategy deadlines.
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(axum::middleware::from_fn(correlation_middleware))
        .layer(TimeoutLayer::new(Duration::from_millis(
            state.settings.server.request_timeout_ms,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins
///
/// Disabled CORS means a permissive layer for development; an empty
/// origin list falls back to localhost.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin = %origin, "Invalid CORS origin");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!(origins = parsed.len(), "CORS configured");
    // Credentials forbid wildcard header lists; name the ones we accept.
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT_LANGUAGE,
            axum::http::HeaderName::from_static("x-tenant-id"),
            axum::http::HeaderName::from_static("x-correlation-id"),
            axum::http::HeaderName::from_static("x-user-locale"),
        ])
        .allow_credentials(true)
}
