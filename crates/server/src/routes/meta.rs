//! Discovery endpoints

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::json;

use sitevoice_core::HealthCheckable;

use crate::state::AppState;

/// `GET /info`
pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": "sitevoice",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.settings.environment,
        "api": "/api/v1",
        "endpoints": [
            "/api/v1/kb/search",
            "/api/v1/kb/reindex",
            "/api/v1/kb/status",
            "/api/v1/kb/health",
            "/api/v1/voice/session",
            "/api/v1/voice/stream",
            "/api/v1/voice/health",
        ],
        "openapi": "/openapi.json",
    }))
}

/// `GET /openapi.json`
///
/// A compact document describing the public surface; enough for client
/// generation of the core paths.
pub async fn openapi(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Sitevoice Retrieval & Voice API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "servers": [{ "url": "/api/v1" }],
        "paths": {
            "/kb/search": {
                "post": {
                    "summary": "Hybrid knowledge-base search",
                    "requestBody": { "content": { "application/json": { "schema": {
                        "type": "object",
                        "required": ["query", "site_id"],
                        "properties": {
                            "query": { "type": "string" },
                            "site_id": { "type": "string", "format": "uuid" },
                            "top_k": { "type": "integer", "minimum": 1, "maximum": 50 },
                            "strategies": { "type": "array", "items": { "type": "string",
                                "enum": ["vector", "fulltext", "bm25", "structured"] } },
                            "filters": { "type": "object" },
                            "lang_hint": { "type": "string" },
                            "threshold": { "type": "number" },
                            "include_meta": { "type": "boolean" }
                        }
                    } } } },
                    "responses": {
                        "200": { "description": "Fused matches" },
                        "422": { "description": "Validation failure (problem+json)" },
                        "429": { "description": "Rate limited (problem+json)" },
                        "503": { "description": "Search unavailable (problem+json)" }
                    }
                }
            },
            "/kb/reindex": {
                "post": {
                    "summary": "Schedule a crawl session",
                    "responses": {
                        "200": { "description": "Scheduled" },
                        "409": { "description": "Already running (problem+json)" }
                    }
                }
            },
            "/kb/status": { "get": { "summary": "Index statistics" } },
            "/voice/session": { "post": { "summary": "Create a voice session" } },
            "/voice/stream": {
                "get": { "summary": "SSE event stream for a session" },
                "post": { "summary": "Send text or audio input into a session" }
            },
            "/voice/session/{id}": { "delete": { "summary": "End a voice session" } }
        },
        "components": {
            "securitySchemes": {
                "tenantHeader": { "type": "apiKey", "in": "header", "name": "X-Tenant-Id" }
            }
        },
        "x-supported-locales": state.locales.supported(),
    }))
}

/// `GET|POST /api/search`, kept as a permanent redirect for old clients
pub async fn legacy_search_redirect() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/api/v1/kb/search")],
    )
}

/// `GET /health` liveness probe
pub async fn liveness() -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /ready` readiness probe
///
/// Verifies the store and the embedding endpoint with a short timeout;
/// a degraded dependency flips the response to 503.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store_status = match state.store.as_deref() {
        Some(store) => {
            let store: &dyn HealthCheckable = store;
            if store.health_check().await {
                "ok"
            } else {
                "unreachable"
            }
        },
        None => "offline",
    };

    let embedding_url = state.settings.embedding.endpoint.clone();
    let embedding_status = match tokio::time::timeout(
        std::time::Duration::from_secs(2),
        reqwest::get(&embedding_url),
    )
    .await
    {
        Ok(Ok(_)) => "ok",
        Ok(Err(_)) => "unreachable",
        Err(_) => "timeout",
    };

    let ready = store_status == "ok" && embedding_status == "ok";
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "store": store_status,
                "embedding": embedding_status,
                "voice_sessions": state.voice.status().active_sessions,
            }
        })),
    )
}
