//! Rate limiting middleware
//!
//! Applied to the whole API surface; health and metrics endpoints stay
//! reachable for probes. Headers are emitted on every response, and
//! rejections carry a problem body with `Retry-After`.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use sitevoice_core::{CorrelationId, Error};
use sitevoice_guard::{apply_rate_limit_headers, problem_response, KeyStrategy, RateKeyContext};

use crate::metrics::record_rate_limited;
use crate::state::AppState;

/// Paths exempt from rate limiting
fn is_exempt(path: &str) -> bool {
    path.ends_with("/health") || path == "/ready" || path == "/metrics" || path == "/info"
}

/// Check, forward, stamp headers, refund per the configured hooks
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.settings.rate_limit.enabled {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if is_exempt(&path) {
        return next.run(request).await;
    }

    let ctx = RateKeyContext {
        ip: client_ip(&request),
        user_id: None,
        tenant_id: request
            .headers()
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        endpoint: Some(path.clone()),
    };
    // Tenant buckets keep multi-tenant fairness even when the load
    // balancer strips the client address; tenantless traffic falls back
    // to the IP key.
    let key = KeyStrategy::Tenant.key(&ctx);

    let decision = state.limiter.check(&key).await;

    if !decision.allowed {
        record_rate_limited();
        let correlation = request.extensions().get::<CorrelationId>().cloned();
        let retry_after = decision.retry_after_secs.unwrap_or(1);
        let mut response = problem_response(
            &Error::RateLimited { retry_after_secs: retry_after },
            Some(&path),
            correlation.as_ref(),
            None,
        );
        apply_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    state.limiter.maybe_refund(&key, response.status().as_u16()).await;
    response
}

/// Client address from forwarding headers
fn client_ip(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}
