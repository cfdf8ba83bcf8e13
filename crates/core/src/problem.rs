//! RFC 9457 problem details
//!
//! Plain payload type; the HTTP layer owns serialisation into
//! `application/problem+json` responses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationId;
use crate::error::Error;

/// Base URI for problem `type` values
pub const PROBLEM_TYPE_BASE: &str = "https://sitevoice.dev/problems";

/// RFC 9457 problem-details payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// Problem type URI
    #[serde(rename = "type")]
    pub type_uri: String,
    /// Short human-readable summary
    pub title: String,
    /// HTTP status
    pub status: u16,
    /// Occurrence-specific detail, safe to show in a UI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// URI of the specific occurrence (the request path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Correlation id of the failed request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Tenant the request was scoped to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    /// Seconds the caller should wait before retrying (429 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ProblemDetails {
    /// Build the payload for a platform error
    pub fn from_error(err: &Error) -> Self {
        let retry_after = match err {
            Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        Self {
            type_uri: format!("{}/{}", PROBLEM_TYPE_BASE, err.problem_slug()),
            title: title_for(err),
            status: err.status(),
            detail: Some(err.to_string()),
            instance: None,
            correlation_id: None,
            tenant_id: None,
            retry_after,
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_correlation(mut self, correlation: &CorrelationId) -> Self {
        self.correlation_id = Some(correlation.as_str().to_string());
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

fn title_for(err: &Error) -> String {
    match err {
        Error::Validation(_) => "Request validation failed",
        Error::MissingTenantId => "Tenant id is required",
        Error::InvalidTenantId(_) => "Tenant id is invalid",
        Error::Unauthorized(_) => "Authentication required",
        Error::Forbidden(_) => "Access denied",
        Error::RateLimited { .. } => "Too many requests",
        Error::NotFound(_) => "Resource not found",
        Error::AlreadyRunning { .. } => "Job already running",
        Error::SearchUnavailable(_) => "Search temporarily unavailable",
        Error::StoreUnavailable(_) => "Storage temporarily unavailable",
        Error::Transient(_) => "Temporary failure",
        Error::DimensionMismatch { .. } => "Embedding dimension mismatch",
        Error::Internal(_) => "Internal server error",
    }
    .to_string()
}
