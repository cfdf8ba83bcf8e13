//! Error-to-response mapping

use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use sitevoice_core::{CorrelationId, Error};
use sitevoice_guard::problem_response;

/// A failed request with its response context
///
/// Handlers build this from a platform error plus whatever request
/// scope they have; rendering delegates to the problem-response layer.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub correlation: Option<CorrelationId>,
    pub tenant_id: Option<Uuid>,
    pub instance: Option<String>,
}

impl ApiError {
    pub fn new(error: Error) -> Self {
        Self { error, correlation: None, tenant_id: None, instance: None }
    }

    pub fn with_correlation(mut self, correlation: CorrelationId) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        problem_response(
            &self.error,
            self.instance.as_deref(),
            self.correlation.as_ref(),
            self.tenant_id,
        )
    }
}
