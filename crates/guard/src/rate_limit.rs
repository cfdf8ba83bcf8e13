//! Rate limiting
//!
//! Two interchangeable strategies over a pluggable store: a sliding
//! window of request timestamps (default for API traffic) and a
//! refilling token bucket for bursty channels. A failing store never
//! rejects traffic: the limiter logs and allows (fail open).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;

use sitevoice_config::{RateLimitConfig, RateLimitStrategyKind};

/// Strategy selection, mirrored from configuration
pub type RateStrategy = RateLimitStrategyKind;

/// How request keys are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// By caller IP
    Ip,
    /// By authenticated user
    User,
    /// By tenant
    Tenant,
    /// By user and endpoint
    UserEndpoint,
    /// By tenant and endpoint
    TenantEndpoint,
}

/// Request attributes a key can be derived from
#[derive(Debug, Clone, Default)]
pub struct RateKeyContext {
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub endpoint: Option<String>,
}

impl KeyStrategy {
    /// Derive the bucket key; missing attributes fall back to the IP
    pub fn key(&self, ctx: &RateKeyContext) -> String {
        let ip = || ctx.ip.clone().unwrap_or_else(|| "unknown".to_string());
        let endpoint = || ctx.endpoint.clone().unwrap_or_default();
        match self {
            KeyStrategy::Ip => format!("ip:{}", ip()),
            KeyStrategy::User => match &ctx.user_id {
                Some(user) => format!("user:{}", user),
                None => format!("ip:{}", ip()),
            },
            KeyStrategy::Tenant => match &ctx.tenant_id {
                Some(tenant) => format!("tenant:{}", tenant),
                None => format!("ip:{}", ip()),
            },
            KeyStrategy::UserEndpoint => match &ctx.user_id {
                Some(user) => format!("user:{}:{}", user, endpoint()),
                None => format!("ip:{}:{}", ip(), endpoint()),
            },
            KeyStrategy::TenantEndpoint => match &ctx.tenant_id {
                Some(tenant) => format!("tenant:{}:{}", tenant, endpoint()),
                None => format!("ip:{}:{}", ip(), endpoint()),
            },
        }
    }
}

/// Sliding-window acquire result
#[derive(Debug, Clone, Copy)]
pub struct WindowState {
    pub allowed: bool,
    /// Entries in the window after eviction (and insertion when allowed)
    pub count: u32,
    /// Oldest remaining entry, for reset computation
    pub oldest_ms: Option<u64>,
}

/// Token-bucket acquire result
#[derive(Debug, Clone, Copy)]
pub struct BucketState {
    pub allowed: bool,
    /// Tokens left after the acquire
    pub tokens: f64,
}

/// Pluggable limiter storage
///
/// The in-memory implementation serves development; networked stores
/// implement the same operations with CAS or scripted atomicity.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn window_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max: u32,
    ) -> Result<WindowState, String>;

    /// Remove the most recent window entry (decrement hook)
    async fn window_refund(&self, key: &str) -> Result<(), String>;

    async fn bucket_acquire(
        &self,
        key: &str,
        now_ms: u64,
        burst: f64,
        refill_per_sec: f64,
    ) -> Result<BucketState, String>;

    /// Return one token, capped at burst (decrement hook)
    async fn bucket_refund(&self, key: &str, burst: f64) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

/// In-memory limiter store
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn window_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max: u32,
    ) -> Result<WindowState, String> {
        let mut windows = self.windows.lock();
        let entries = windows.entry(key.to_string()).or_default();

        let cutoff = now_ms.saturating_sub(window_ms);
        while entries.front().map(|t| *t < cutoff).unwrap_or(false) {
            entries.pop_front();
        }

        let allowed = (entries.len() as u32) < max;
        if allowed {
            entries.push_back(now_ms);
        }

        Ok(WindowState {
            allowed,
            count: entries.len() as u32,
            oldest_ms: entries.front().copied(),
        })
    }

    async fn window_refund(&self, key: &str) -> Result<(), String> {
        let mut windows = self.windows.lock();
        if let Some(entries) = windows.get_mut(key) {
            entries.pop_back();
        }
        Ok(())
    }

    async fn bucket_acquire(
        &self,
        key: &str,
        now_ms: u64,
        burst: f64,
        refill_per_sec: f64,
    ) -> Result<BucketState, String> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert(Bucket { tokens: burst, last_refill_ms: now_ms });

        let elapsed_secs = now_ms.saturating_sub(bucket.last_refill_ms) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed_secs * refill_per_sec).min(burst);
        bucket.last_refill_ms = now_ms;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        Ok(BucketState { allowed, tokens: bucket.tokens })
    }

    async fn bucket_refund(&self, key: &str, burst: f64) -> Result<(), String> {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(key) {
            bucket.tokens = (bucket.tokens + 1.0).min(burst);
        }
        Ok(())
    }
}

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub strategy: RateStrategy,
    pub max_requests: u32,
    pub window_secs: u64,
    pub burst: u32,
    pub refill_per_sec: f64,
    pub skip_successful_requests: bool,
    pub skip_failed_requests: bool,
}

impl From<&RateLimitConfig> for RateLimiterConfig {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            strategy: config.strategy,
            max_requests: config.max_requests,
            window_secs: config.window_secs,
            burst: config.burst,
            refill_per_sec: config.refill_per_sec,
            skip_successful_requests: config.skip_successful_requests,
            skip_failed_requests: config.skip_failed_requests,
        }
    }
}

/// The decision handed back for header emission
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets or the bucket refills a token
    pub reset_secs: u64,
    /// Seconds the caller should wait; present on rejection
    pub retry_after_secs: Option<u64>,
    /// IETF policy string, `<max>;w=<windowSeconds>`
    pub policy: String,
}

impl RateLimitDecision {
    fn open(config: &RateLimiterConfig) -> Self {
        Self {
            allowed: true,
            limit: config.max_requests,
            remaining: 0,
            reset_secs: config.window_secs,
            retry_after_secs: None,
            policy: format!("{};w={}", config.max_requests, config.window_secs),
        }
    }
}

/// The rate limiter
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check a key against the configured strategy
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, now_ms()).await
    }

    /// Check at an explicit clock reading (deterministic for tests)
    pub async fn check_at(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        match self.config.strategy {
            RateStrategy::SlidingWindow => self.check_window(key, now_ms).await,
            RateStrategy::TokenBucket => self.check_bucket(key, now_ms).await,
        }
    }

    async fn check_window(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        let window_ms = self.config.window_secs * 1000;
        let state = match self
            .store
            .window_acquire(key, now_ms, window_ms, self.config.max_requests)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(key, error = %e, "Rate limit store failed, allowing request");
                return RateLimitDecision::open(&self.config);
            },
        };

        let reset_ms = state
            .oldest_ms
            .map(|oldest| (oldest + window_ms).saturating_sub(now_ms))
            .unwrap_or(window_ms);
        let reset_secs = reset_ms.div_ceil(1000).max(1);

        RateLimitDecision {
            allowed: state.allowed,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(state.count),
            reset_secs,
            retry_after_secs: if state.allowed { None } else { Some(reset_secs) },
            policy: format!("{};w={}", self.config.max_requests, self.config.window_secs),
        }
    }

    async fn check_bucket(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        let burst = self.config.burst as f64;
        let state = match self
            .store
            .bucket_acquire(key, now_ms, burst, self.config.refill_per_sec)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(key, error = %e, "Rate limit store failed, allowing request");
                return RateLimitDecision::open(&self.config);
            },
        };

        let deficit = (1.0 - state.tokens).max(0.0);
        let reset_secs = (deficit / self.config.refill_per_sec).ceil().max(1.0) as u64;

        RateLimitDecision {
            allowed: state.allowed,
            limit: self.config.burst,
            remaining: state.tokens.floor().max(0.0) as u32,
            reset_secs,
            retry_after_secs: if state.allowed { None } else { Some(reset_secs) },
            policy: format!("{};w={}", self.config.burst, self.config.window_secs),
        }
    }

    /// Refund one unit after a response the configuration says to skip
    pub async fn maybe_refund(&self, key: &str, status: u16) {
        let refund = (self.config.skip_successful_requests && (200..300).contains(&status))
            || (self.config.skip_failed_requests && status >= 400);
        if !refund {
            return;
        }

        let result = match self.config.strategy {
            RateStrategy::SlidingWindow => self.store.window_refund(key).await,
            RateStrategy::TokenBucket => {
                self.store.bucket_refund(key, self.config.burst as f64).await
            },
        };
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "Rate limit refund failed");
        }
    }
}

/// Emit IETF draft headers plus the legacy `X-RateLimit-*` mirrors
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let pairs = [
        ("ratelimit-limit", decision.limit.to_string()),
        ("ratelimit-remaining", decision.remaining.to_string()),
        ("ratelimit-reset", decision.reset_secs.to_string()),
        ("ratelimit-policy", decision.policy.clone()),
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_secs.to_string()),
    ];
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value))
        {
            headers.insert(name, value);
        }
    }
    if let Some(retry_after) = decision.retry_after_secs {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert(axum::http::header::RETRY_AFTER, value);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(strategy: RateStrategy, max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            RateLimiterConfig {
                strategy,
                max_requests: max,
                window_secs,
                burst: max,
                refill_per_sec: 1.0,
                skip_successful_requests: false,
                skip_failed_requests: false,
            },
        )
    }

    #[tokio::test]
    async fn test_window_three_then_reject() {
        let limiter = limiter(RateStrategy::SlidingWindow, 3, 60);
        let t0 = 1_000_000;

        let first = limiter.check_at("ip:1.2.3.4", t0).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);

        let second = limiter.check_at("ip:1.2.3.4", t0 + 10).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 1);

        let third = limiter.check_at("ip:1.2.3.4", t0 + 20).await;
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);

        let fourth = limiter.check_at("ip:1.2.3.4", t0 + 30).await;
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);
        assert!(fourth.retry_after_secs.unwrap() >= 1);
        assert_eq!(fourth.policy, "3;w=60");
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = limiter(RateStrategy::SlidingWindow, 2, 1);
        let t0 = 1_000_000;

        assert!(limiter.check_at("k", t0).await.allowed);
        assert!(limiter.check_at("k", t0 + 100).await.allowed);
        assert!(!limiter.check_at("k", t0 + 200).await.allowed);

        // The first entry falls out of the window after a second.
        assert!(limiter.check_at("k", t0 + 1_100).await.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(RateStrategy::SlidingWindow, 1, 60);
        let t0 = 1_000_000;
        assert!(limiter.check_at("ip:a", t0).await.allowed);
        assert!(limiter.check_at("ip:b", t0).await.allowed);
        assert!(!limiter.check_at("ip:a", t0 + 1).await.allowed);
    }

    #[tokio::test]
    async fn test_token_bucket_burst_and_refill() {
        let limiter = limiter(RateStrategy::TokenBucket, 2, 60);
        let t0 = 1_000_000;

        assert!(limiter.check_at("k", t0).await.allowed);
        assert!(limiter.check_at("k", t0).await.allowed);
        let rejected = limiter.check_at("k", t0).await;
        assert!(!rejected.allowed);
        assert!(rejected.retry_after_secs.is_some());

        // One token refills after a second at 1 token/sec.
        assert!(limiter.check_at("k", t0 + 1_000).await.allowed);
        // The bucket never exceeds burst even after a long idle period.
        let _ = limiter.check_at("k", t0 + 100_000).await;
        let _ = limiter.check_at("k", t0 + 100_000).await;
        assert!(!limiter.check_at("k", t0 + 100_000).await.allowed);
    }

    #[tokio::test]
    async fn test_refund_does_not_underflow() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let limiter = RateLimiter::new(
            store,
            RateLimiterConfig {
                strategy: RateStrategy::SlidingWindow,
                max_requests: 2,
                window_secs: 60,
                burst: 2,
                refill_per_sec: 1.0,
                skip_successful_requests: true,
                skip_failed_requests: false,
            },
        );

        // Refunding with no recorded entries is a no-op.
        limiter.maybe_refund("k", 200).await;
        let t0 = 1_000_000;
        assert!(limiter.check_at("k", t0).await.allowed);
        limiter.maybe_refund("k", 200).await;

        // The refunded slot is available again.
        assert!(limiter.check_at("k", t0 + 1).await.allowed);
        assert!(limiter.check_at("k", t0 + 2).await.allowed);
        assert!(!limiter.check_at("k", t0 + 3).await.allowed);
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        struct BrokenStore;

        #[async_trait]
        impl RateLimitStore for BrokenStore {
            async fn window_acquire(
                &self,
                _key: &str,
                _now_ms: u64,
                _window_ms: u64,
                _max: u32,
            ) -> Result<WindowState, String> {
                Err("store down".to_string())
            }

            async fn window_refund(&self, _key: &str) -> Result<(), String> {
                Err("store down".to_string())
            }

            async fn bucket_acquire(
                &self,
                _key: &str,
                _now_ms: u64,
                _burst: f64,
                _refill_per_sec: f64,
            ) -> Result<BucketState, String> {
                Err("store down".to_string())
            }

            async fn bucket_refund(&self, _key: &str, _burst: f64) -> Result<(), String> {
                Err("store down".to_string())
            }
        }

        let limiter = RateLimiter::new(
            Arc::new(BrokenStore),
            RateLimiterConfig {
                strategy: RateStrategy::SlidingWindow,
                max_requests: 1,
                window_secs: 60,
                burst: 1,
                refill_per_sec: 1.0,
                skip_successful_requests: false,
                skip_failed_requests: false,
            },
        );

        for _ in 0..5 {
            assert!(limiter.check("k").await.allowed);
        }
    }

    #[test]
    fn test_key_strategies() {
        let ctx = RateKeyContext {
            ip: Some("1.2.3.4".to_string()),
            user_id: Some("u1".to_string()),
            tenant_id: Some("t1".to_string()),
            endpoint: Some("/kb/search".to_string()),
        };
        assert_eq!(KeyStrategy::Ip.key(&ctx), "ip:1.2.3.4");
        assert_eq!(KeyStrategy::User.key(&ctx), "user:u1");
        assert_eq!(KeyStrategy::Tenant.key(&ctx), "tenant:t1");
        assert_eq!(KeyStrategy::UserEndpoint.key(&ctx), "user:u1:/kb/search");
        assert_eq!(KeyStrategy::TenantEndpoint.key(&ctx), "tenant:t1:/kb/search");

        // Missing attributes fall back to the IP key.
        let anonymous = RateKeyContext { ip: Some("1.2.3.4".to_string()), ..Default::default() };
        assert_eq!(KeyStrategy::Tenant.key(&anonymous), "ip:1.2.3.4");
    }

    #[test]
    fn test_header_emission() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset_secs: 42,
            retry_after_secs: Some(42),
            policy: "3;w=60".to_string(),
        };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &decision);

        assert_eq!(headers.get("ratelimit-limit").unwrap(), "3");
        assert_eq!(headers.get("ratelimit-remaining").unwrap(), "0");
        assert_eq!(headers.get("ratelimit-reset").unwrap(), "42");
        assert_eq!(headers.get("ratelimit-policy").unwrap(), "3;w=60");
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "3");
        assert_eq!(headers.get("retry-after").unwrap(), "42");
    }
}
