//! Platform error taxonomy
//!
//! Every component maps its local errors into this enum at the crate
//! boundary; the HTTP layer turns it into a problem-details response.

use thiserror::Error;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Platform errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Tenant id is required")]
    MissingTenantId,

    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("A {mode} crawl is already running for this site")]
    AlreadyRunning { mode: String },

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Embedding dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error maps to at the request boundary
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) => 422,
            Error::MissingTenantId | Error::InvalidTenantId(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::RateLimited { .. } => 429,
            Error::NotFound(_) => 404,
            Error::AlreadyRunning { .. } => 409,
            Error::SearchUnavailable(_) => 503,
            Error::StoreUnavailable(_) | Error::Transient(_) => 503,
            Error::DimensionMismatch { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable problem-type slug, appended to the problem `type` base URI
    pub fn problem_slug(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation-failed",
            Error::MissingTenantId => "missing-tenant-id",
            Error::InvalidTenantId(_) => "invalid-tenant-id",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::RateLimited { .. } => "rate-limited",
            Error::NotFound(_) => "not-found",
            Error::AlreadyRunning { .. } => "already-running",
            Error::SearchUnavailable(_) => "search-unavailable",
            Error::StoreUnavailable(_) => "store-unavailable",
            Error::Transient(_) => "transient",
            Error::DimensionMismatch { .. } => "dimension-mismatch",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. }
                | Error::SearchUnavailable(_)
                | Error::StoreUnavailable(_)
                | Error::Transient(_)
        )
    }
}
