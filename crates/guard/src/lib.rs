//! Request-path guard layer
//!
//! Everything a retrieval call traverses before it reaches the engine:
//! - Token-bucket and sliding-window rate limiting with IETF headers
//! - Tenant extraction, format gate and scoped query helpers
//! - BCP-47 locale negotiation
//! - RFC 9457 problem responses
//! - Correlation id propagation

pub mod correlation;
pub mod locale;
pub mod problem;
pub mod rate_limit;
pub mod tenant;

pub use correlation::{correlation_middleware, CORRELATION_HEADER};
pub use locale::LocaleNegotiator;
pub use problem::{problem_response, Problem};
pub use rate_limit::{
    apply_rate_limit_headers, InMemoryRateLimitStore, KeyStrategy, RateKeyContext,
    RateLimitDecision, RateLimitStore, RateLimiter, RateLimiterConfig, RateStrategy,
};
pub use tenant::{
    resolve_tenant, TenantCandidates, TenantOwned, TenantResolution, TenantScope, TenantSource,
    RESERVED_SUBDOMAINS,
};
