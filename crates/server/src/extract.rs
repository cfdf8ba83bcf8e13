//! Request extractors
//!
//! Tenant resolution and correlation context as axum extractors, so
//! handlers declare what they need and rejections render as problem
//! responses.

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use sitevoice_core::CorrelationId;
use sitevoice_guard::{resolve_tenant, TenantCandidates, TenantScope};

use crate::error::ApiError;
use crate::state::AppState;

/// Correlation id plus the request path, available on every route
#[derive(Debug, Clone)]
pub struct Meta {
    pub correlation: CorrelationId,
    pub path: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Meta
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation = parts
            .extensions
            .get::<CorrelationId>()
            .cloned()
            .unwrap_or_else(CorrelationId::generate);
        Ok(Self { correlation, path: parts.uri.path().to_string() })
    }
}

/// Required tenant context
///
/// Resolution follows the documented precedence; a missing or invalid
/// tenant rejects the request with a 400 problem response.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub scope: TenantScope,
    pub meta: Meta,
}

#[async_trait]
impl FromRequestParts<AppState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let meta = Meta::from_request_parts(parts, state).await?;

        let header_value = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query_value = query_param(parts.uri.query(), "tenant_id");
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let candidates = TenantCandidates {
            // Token verification lives at the edge; a verified claim
            // arrives as a trusted header on internal hops.
            bearer_claim: None,
            header: header_value,
            route_param: None,
            query_param: query_value,
            host,
        };

        let resolution = resolve_tenant(&candidates, true).map_err(|e| {
            ApiError::new(e)
                .with_correlation(meta.correlation.clone())
                .with_instance(meta.path.clone())
        })?;

        // resolve_tenant with required=true never yields the anonymous
        // sentinel.
        let tenant_id = resolution.tenant_id.ok_or_else(|| {
            ApiError::new(sitevoice_core::Error::MissingTenantId)
                .with_correlation(meta.correlation.clone())
        })?;

        Ok(Self { scope: TenantScope::new(tenant_id), meta })
    }
}

/// JSON body whose rejection renders as a problem response
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let correlation = request
            .extensions()
            .get::<CorrelationId>()
            .cloned()
            .unwrap_or_else(CorrelationId::generate);
        let path = request.uri().path().to_string();

        match axum::Json::<T>::from_request(request, state).await {
            Ok(axum::Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::new(sitevoice_core::Error::Validation(
                rejection.body_text(),
            ))
            .with_correlation(correlation)
            .with_instance(path)),
        }
    }
}

/// Locale override from the `X-User-Locale` header or `?locale=`
pub fn locale_override(headers: &axum::http::HeaderMap, query: Option<&str>) -> Option<String> {
    headers
        .get("x-user-locale")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_param(query, "locale"))
}

/// Minimal query-string lookup; tenant ids and locales need no decoding
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key == name {
            parts.next().map(str::to_string).filter(|v| !v.is_empty())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("a=1&tenant_id=abc&b=2"), "tenant_id"),
            Some("abc".to_string())
        );
        assert_eq!(query_param(Some("tenant_id="), "tenant_id"), None);
        assert_eq!(query_param(Some("a=1"), "tenant_id"), None);
        assert_eq!(query_param(None, "tenant_id"), None);
    }
}
