//! HTTP surface for the retrieval platform
//!
//! Exposes the knowledge-base search and indexing endpoints plus the
//! voice session channel under `/api/v1`, with the guard layer
//! (correlation, tenant, rate limiting, problem responses) applied to
//! every route.

pub mod crawler;
pub mod error;
pub mod extract;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use crawler::{HttpCrawlerConfig, HttpCrawlerDriver};
pub use error::ApiError;
pub use http::create_router;
pub use metrics::{init_metrics, record_search, record_voice_session};
pub use state::AppState;
