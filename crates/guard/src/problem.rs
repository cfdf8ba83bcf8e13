//! Problem responses
//!
//! Maps the platform error taxonomy to RFC 9457 bodies served as
//! `application/problem+json`. Every error path at the HTTP boundary
//! goes through here.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use sitevoice_core::{CorrelationId, Error, ProblemDetails};

/// Content type for problem bodies
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Response wrapper carrying a problem-details payload
#[derive(Debug, Clone)]
pub struct Problem(pub ProblemDetails);

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.0.retry_after;

        let body = serde_json::to_vec(&self.0).unwrap_or_else(|_| b"{}".to_vec());
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Build the full problem response for an error
pub fn problem_response(
    error: &Error,
    instance: Option<&str>,
    correlation: Option<&CorrelationId>,
    tenant_id: Option<Uuid>,
) -> Response {
    let mut details = ProblemDetails::from_error(error);
    if let Some(instance) = instance {
        details = details.with_instance(instance);
    }
    if let Some(correlation) = correlation {
        details = details.with_correlation(correlation);
    }
    if let Some(tenant_id) = tenant_id {
        details = details.with_tenant(tenant_id);
    }

    if error.status() >= 500 {
        tracing::error!(
            status = error.status(),
            kind = error.problem_slug(),
            error = %error,
            "Request failed"
        );
    } else {
        tracing::debug!(
            status = error.status(),
            kind = error.problem_slug(),
            error = %error,
            "Request rejected"
        );
    }

    Problem(details).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_response_shape() {
        let correlation = CorrelationId::generate();
        let response = problem_response(
            &Error::RateLimited { retry_after_secs: 9 },
            Some("/api/v1/kb/search"),
            Some(&correlation),
            None,
        );

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_CONTENT_TYPE
        );
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "9");
    }

    #[test]
    fn test_unknown_status_falls_back_to_500() {
        let details = ProblemDetails {
            type_uri: "about:blank".to_string(),
            title: "weird".to_string(),
            status: 1,
            detail: None,
            instance: None,
            correlation_id: None,
            tenant_id: None,
            retry_after: None,
        };
        let response = Problem(details).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
