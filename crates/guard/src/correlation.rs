//! Correlation id middleware
//!
//! Adopts the caller's `X-Correlation-ID` when usable, generates one
//! otherwise, exposes it to handlers via request extensions and echoes
//! it on the response.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use sitevoice_core::CorrelationId;

/// Correlation header name
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Attach a correlation id to the request scope and response
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(CorrelationId::parse)
        .unwrap_or_else(CorrelationId::generate);

    request.extensions_mut().insert(correlation.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(correlation.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    async fn echo(Extension(correlation): Extension<CorrelationId>) -> String {
        correlation.as_str().to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo))
            .layer(axum::middleware::from_fn(correlation_middleware))
    }

    #[tokio::test]
    async fn test_generates_when_absent() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_HEADER));
    }

    #[tokio::test]
    async fn test_echoes_caller_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(CORRELATION_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(CORRELATION_HEADER).unwrap(), "req-42");
    }
}
