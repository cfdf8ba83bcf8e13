//! Knowledge-base endpoints

use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use sitevoice_core::{Error, Filters, HealthCheckable, StatsReportable};
use sitevoice_index::{CrawlRequest, SessionKind};
use sitevoice_retrieval::{CacheStatus, SearchRequest, SearchStrategy};

use crate::error::ApiError;
use crate::extract::{locale_override, query_param, ApiJson, Meta, Tenant};
use crate::metrics::record_search;
use crate::state::AppState;

/// Boundary cap on requested result counts
const MAX_TOP_K: usize = 50;

/// `POST /api/v1/kb/search` body
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    pub site_id: Uuid,
    pub top_k: Option<usize>,
    pub strategies: Option<Vec<SearchStrategy>>,
    #[serde(default)]
    pub filters: Filters,
    /// Locale preference; wins over Accept-Language when supported
    pub lang_hint: Option<String>,
    /// Minimum similarity for vector candidates
    pub threshold: Option<f32>,
    #[serde(default)]
    pub include_meta: bool,
}

#[derive(Debug, Serialize)]
struct MatchPayload {
    id: Uuid,
    url: String,
    snippet: String,
    score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<serde_json::Value>,
}

/// `POST /api/v1/kb/search`
pub async fn search(
    State(state): State<AppState>,
    tenant: Tenant,
    headers: HeaderMap,
    ApiJson(body): ApiJson<SearchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
            .with_instance(tenant.meta.path.clone())
    };

    let top_k = body.top_k.unwrap_or(state.settings.search.default_top_k);
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(fail(Error::Validation(format!(
            "top_k must be between 1 and {}",
            MAX_TOP_K
        ))));
    }

    let accept_language = headers.get("accept-language").and_then(|v| v.to_str().ok());
    let override_locale = body
        .lang_hint
        .clone()
        .or_else(|| locale_override(&headers, None));
    let used_language = state
        .locales
        .negotiate(accept_language, override_locale.as_deref());

    // An explicit, supported hint becomes a locale filter; otherwise the
    // search spans every locale.
    let locale_filter = body
        .lang_hint
        .as_deref()
        .filter(|hint| state.locales.is_supported(hint))
        .map(|_| used_language.clone());

    let engine = state.engine().map_err(&fail)?;

    let request = SearchRequest {
        tenant_id: tenant.scope.tenant_id(),
        site_id: body.site_id,
        query: body.query,
        top_k,
        strategies: body
            .strategies
            .unwrap_or_else(|| vec![SearchStrategy::Vector, SearchStrategy::Fulltext]),
        locale: locale_filter,
        filters: body.filters,
        min_score: body.threshold,
        bypass_cache: false,
    };

    let response = engine.search(request).await.map_err(|e| fail(e.into()))?;

    record_search(
        match response.cache {
            CacheStatus::Hit => "hit",
            CacheStatus::Stale => "stale",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        },
        !response.degraded.is_empty(),
        response.processing_time_ms,
    );

    let matches: Vec<MatchPayload> = response
        .matches
        .iter()
        .map(|m| MatchPayload {
            id: m.id,
            url: m.url.clone(),
            snippet: m.snippet.clone(),
            score: m.score,
            title: m.title.clone(),
            meta: if body.include_meta {
                serde_json::to_value(&m.fusion).ok()
            } else {
                None
            },
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": {
            "matches": matches,
            "usedLanguage": used_language,
            "totalMatches": response.total_matches,
            "processingTime": response.processing_time_ms,
            "searchId": response.search_id,
            "degraded": response.degraded,
            "cache": response.cache,
        }
    })))
}

/// `POST /api/v1/kb/reindex` body
#[derive(Debug, Deserialize)]
pub struct ReindexBody {
    pub mode: ReindexMode,
    pub site_id: Uuid,
    pub site_url: Option<String>,
    #[serde(default)]
    pub options: ReindexOptions,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexMode {
    Delta,
    Full,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReindexOptions {
    /// Explicit URL set turns the job into a selective session
    pub urls: Option<Vec<String>>,
}

/// `POST /api/v1/kb/reindex`
pub async fn reindex(
    State(state): State<AppState>,
    tenant: Tenant,
    headers: HeaderMap,
    ApiJson(body): ApiJson<ReindexBody>,
) -> Result<impl IntoResponse, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
            .with_instance(tenant.meta.path.clone())
    };

    // Reindex is restricted to site owners and admins; the verified role
    // arrives from the auth edge.
    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if role != "owner" && role != "admin" {
        return Err(fail(Error::Forbidden("reindex requires owner or admin role".to_string())));
    }

    let kind = match (&body.options.urls, body.mode) {
        (Some(_), _) => SessionKind::Selective,
        (None, ReindexMode::Delta) => SessionKind::Delta,
        (None, ReindexMode::Full) => SessionKind::Full,
    };

    let orchestrator = state.orchestrator().map_err(&fail)?;
    let job_id = orchestrator
        .submit(CrawlRequest {
            tenant_id: tenant.scope.tenant_id(),
            site_id: body.site_id,
            site_url: body.site_url.unwrap_or_default(),
            kind,
            urls: body.options.urls,
            last_crawl: None,
        })
        .await
        .map_err(|e| fail(e.into()))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "jobId": job_id,
            "mode": kind.as_str(),
            "status": "scheduled",
            "estimatedStartTime": Utc::now(),
        })),
    ))
}

/// `GET /api/v1/kb/status` with an optional `?site_id=` filter
pub async fn status(
    State(state): State<AppState>,
    tenant: Tenant,
    uri: axum::http::Uri,
) -> Result<impl IntoResponse, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
    };

    let site_id = match query_param(uri.query(), "site_id") {
        Some(raw) => Some(
            Uuid::parse_str(&raw)
                .map_err(|_| fail(Error::Validation("site_id must be a UUID".to_string())))?,
        ),
        None => None,
    };

    let store = state.store.as_ref().ok_or_else(|| {
        fail(Error::StoreUnavailable("retrieval store is offline".to_string()))
    })?;
    let stats = store
        .stats(tenant.scope.tenant_id(), site_id)
        .await
        .map_err(|e| fail(e.into()))?;
    let crawl = state
        .orchestrator
        .as_ref()
        .map(|o| o.stats(tenant.scope.tenant_id()))
        .unwrap_or_default();
    let cache = match &state.engine {
        Some(engine) => Some(engine.cache().stats_snapshot().await),
        None => None,
    };

    Ok(Json(json!({
        "documents": stats.document_count,
        "chunks": stats.chunk_count,
        "embeddings": stats.embedding_count,
        "avgChunkTokens": stats.avg_chunk_tokens,
        "indexKind": stats.index_kind.map(|k| k.as_str()),
        "crawlSessions": crawl.sessions,
        "pagesProcessed": crawl.pages_processed,
        "crawlErrors": crawl.errors,
        "processing": crawl.processing,
        "lastCrawlTime": crawl.last_crawl_time,
        "cache": cache,
        "supportedLanguages": state.locales.supported(),
    })))
}

/// `GET /api/v1/kb/health`
pub async fn health(State(state): State<AppState>, _meta: Meta) -> impl IntoResponse {
    // Components advertise liveness through HealthCheckable; a component
    // that never came up reads as unhealthy.
    let components: [(&str, Option<&dyn HealthCheckable>); 2] = [
        (
            "store",
            state.store.as_deref().map(|s| s as &dyn HealthCheckable),
        ),
        (
            "crawler",
            state.orchestrator.as_deref().map(|o| o as &dyn HealthCheckable),
        ),
    ];

    let mut checks = serde_json::Map::new();
    let mut healthy = true;
    for (name, component) in components {
        let ok = match component {
            Some(component) => component.health_check().await,
            None => false,
        };
        healthy &= ok;
        let verdict = if ok { "ok" } else { "offline" };
        checks.insert(name.to_string(), json!(verdict));
    }

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "checks": checks,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
