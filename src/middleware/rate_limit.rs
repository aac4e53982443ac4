//! Per-client rate limiting with a fixed-window counter.
//!
//! # Algorithm
//!
//! Each client identity owns a window `(count, window_start)`. For a request
//! at `now`:
//!
//! - no window, or `now >= window_start + W` → new window, `count = 1`, admit
//! - otherwise `count += 1`, admit iff `count <= N`
//!
//! Fixed windows are an approximation: a burst straddling a window boundary
//! can admit up to `2N` requests within a `2W` span.
//!
//! # Concurrency
//!
//! Windows live in a [`DashMap`]. The read-modify-write of one window runs
//! under that key's shard lock, so two concurrent requests from the same
//! client cannot both observe a stale count. Unrelated clients on other
//! shards proceed in parallel.
//!
//! # Response Headers
//!
//! Every limited response carries the draft standard headers:
//! - `RateLimit-Policy`: `N;w=W`
//! - `RateLimit-Limit`: capacity per window
//! - `RateLimit-Remaining`: requests left in the current window
//! - `RateLimit-Reset`: seconds until the window resets
//!
//! Rejections (429) add `Retry-After`.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use dashmap::DashMap;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::{debug, trace};

use super::access_log::AccessLogger;
use super::ip::{TrustedProxyConfig, extract_client_ip};
use super::request_id::RequestContextExt;
use crate::metrics;
use crate::models::ErrorResponse;

pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Body of a 429 response.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Window length cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

// =============================================================================
// Fixed-Window Counter
// =============================================================================

/// Accounting window for one client identity.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub count: u32,
    pub started_at: Instant,
}

impl RateLimitWindow {
    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now >= self.started_at + window
    }
}

/// Outcome of a single limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets
    pub reset_after: Duration,
    /// Configured window length
    pub window: Duration,
}

impl RateLimitDecision {
    /// Reset delay rounded up to whole seconds.
    pub fn reset_secs(&self) -> u64 {
        let millis = u64::try_from(self.reset_after.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1000)
    }

    /// Write the draft standard RateLimit headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", self.limit, self.window.as_secs());
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY, value);
        }
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(self.reset_secs()));
    }
}

/// Fixed-window limiter keyed by client identity.
///
/// Cloning is cheap; clones share the same window table.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    limit: u32,
    window: Duration,
    windows: DashMap<String, RateLimitWindow>,
}

impl FixedWindowLimiter {
    /// Create a limiter admitting `limit` requests per `window` per client.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::ZeroWindow` if `window` is zero.
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            inner: Arc::new(LimiterInner {
                limit,
                window,
                windows: DashMap::new(),
            }),
        })
    }

    pub fn limit(&self) -> u32 {
        self.inner.limit
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Record a request from `key` and decide whether to admit it.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let limit = self.inner.limit;
        let window = self.inner.window;

        // The entry guard holds the shard write lock until it is dropped.
        let mut entry = self
            .inner
            .windows
            .entry(key.to_string())
            .or_insert(RateLimitWindow {
                count: 0,
                started_at: now,
            });
        let state = entry.value_mut();

        if state.count == 0 || state.is_expired(now, window) {
            state.count = 1;
            state.started_at = now;
        } else {
            state.count = state.count.saturating_add(1);
        }

        let count = state.count;
        let reset_after = (state.started_at + window).saturating_duration_since(now);
        drop(entry);

        RateLimitDecision {
            allowed: count <= limit,
            limit,
            remaining: limit - count.min(limit),
            reset_after,
            window,
        }
    }

    /// Remove windows that have expired. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`](Self::sweep) against an explicit clock reading.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let window = self.inner.window;
        let before = self.inner.windows.len();
        // retain() write-locks one shard at a time, excluding check_at on those keys
        self.inner
            .windows
            .retain(|_, state| !state.is_expired(now, window));
        before.saturating_sub(self.inner.windows.len())
    }

    /// Number of client identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.inner.windows.len()
    }

    /// Spawn the background sweeper on `tracker`, running once per window
    /// until `cancel` fires.
    pub fn spawn_sweeper(&self, tracker: &TaskTracker, cancel: CancellationToken) {
        let limiter = self.clone();

        tracker.spawn(async move {
            let mut ticker = interval(limiter.window());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        metrics::set_tracked_clients(limiter.tracked_clients());
                        trace!(
                            removed,
                            tracked = limiter.tracked_clients(),
                            "Swept expired rate limit windows"
                        );
                    }
                }
            }
        });
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Rate limiting layer for the forwarding routes.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = FixedWindowLimiter::new(60, Duration::from_secs(60))?;
/// let layer = RateLimitLayer::new(limiter, trusted_proxies, access_logger);
/// let api = Router::new()
///     .route("/api/{*path}", any(handler))
///     .route_layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: FixedWindowLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
    logger: AccessLogger,
}

impl RateLimitLayer {
    pub fn new(
        limiter: FixedWindowLimiter,
        trusted_proxies: Arc<TrustedProxyConfig>,
        logger: AccessLogger,
    ) -> Self {
        Self {
            limiter,
            trusted_proxies,
            logger,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            logger: self.logger.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: FixedWindowLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
    logger: AccessLogger,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let client_ip = extract_client_ip(&req, &self.trusted_proxies).into_owned();
        let decision = self.limiter.check(&client_ip);

        if !decision.allowed {
            let request_id = req.request_id().to_string();
            self.logger
                .rate_limited(&request_id, &client_ip, req.uri().path(), &decision);
            metrics::record_rate_limited();

            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new(RATE_LIMITED_MESSAGE, &request_id)),
            )
                .into_response();
            decision.apply_headers(response.headers_mut());
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(decision.reset_secs()));

            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            decision.apply_headers(response.headers_mut());
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    const W: Duration = Duration::from_secs(60);

    #[test]
    fn test_zero_window_returns_error() {
        let result = FixedWindowLimiter::new(60, Duration::ZERO);
        assert!(matches!(result, Err(RateLimitError::ZeroWindow)));
    }

    #[test]
    fn test_admits_up_to_capacity_then_rejects() {
        let limiter = FixedWindowLimiter::new(3, W).unwrap();
        let now = Instant::now();

        for n in 1..=3 {
            let decision = limiter.check_at("client", now);
            assert!(decision.allowed, "request {n} should be admitted");
            assert_eq!(decision.remaining, 3 - n);
        }

        let rejected = limiter.check_at("client", now);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
    }

    #[test]
    fn test_window_reset_after_rejection() {
        let limiter = FixedWindowLimiter::new(1, W).unwrap();
        let start = Instant::now();

        assert!(limiter.check_at("client", start).allowed);
        assert!(!limiter.check_at("client", start + Duration::from_secs(30)).allowed);

        // Exactly window_start + W starts a new window
        let decision = limiter.check_at("client", start + W);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_after, W);
    }

    #[test]
    fn test_rejected_requests_stay_rejected_within_window() {
        let limiter = FixedWindowLimiter::new(2, W).unwrap();
        let now = Instant::now();

        for _ in 0..2 {
            assert!(limiter.check_at("client", now).allowed);
        }
        for _ in 0..10 {
            assert!(!limiter.check_at("client", now).allowed);
        }
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = FixedWindowLimiter::new(1, W).unwrap();
        let now = Instant::now();

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn test_reset_secs_rounds_up() {
        let limiter = FixedWindowLimiter::new(5, W).unwrap();
        let start = Instant::now();

        limiter.check_at("client", start);
        let decision = limiter.check_at("client", start + Duration::from_millis(500));
        assert_eq!(decision.reset_secs(), 60);

        let decision = limiter.check_at("client", start + Duration::from_millis(59_001));
        assert_eq!(decision.reset_secs(), 1);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let limiter = FixedWindowLimiter::new(0, W).unwrap();
        assert!(!limiter.check_at("client", Instant::now()).allowed);
    }

    #[test]
    fn test_sweep_removes_only_expired_windows() {
        let limiter = FixedWindowLimiter::new(5, W).unwrap();
        let start = Instant::now();

        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(30));
        assert_eq!(limiter.tracked_clients(), 2);

        let removed = limiter.sweep_at(start + W);
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_clients(), 1);

        // The surviving window keeps its count
        let decision = limiter.check_at("fresh", start + W);
        assert_eq!(decision.remaining, 3);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_capacity() {
        let limiter = FixedWindowLimiter::new(100, W).unwrap();
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check_at("shared", now).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[test]
    fn test_apply_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 60,
            remaining: 59,
            reset_after: Duration::from_secs(60),
            window: W,
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);

        assert_eq!(headers.get("ratelimit-policy").unwrap(), "60;w=60");
        assert_eq!(headers.get("ratelimit-limit").unwrap(), "60");
        assert_eq!(headers.get("ratelimit-remaining").unwrap(), "59");
        assert_eq!(headers.get("ratelimit-reset").unwrap(), "60");
        assert!(headers.get("x-ratelimit-limit").is_none());
    }

    #[tokio::test]
    async fn test_layer_rejects_without_calling_inner() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let layer = RateLimitLayer::new(
            FixedWindowLimiter::new(1, W).unwrap(),
            Arc::new(TrustedProxyConfig::default()),
            AccessLogger::new("test"),
        );
        let service = layer.layer(tower::service_fn(move |_req: Request<Body>| {
            calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Body::empty())) }
        }));

        let first = service
            .clone()
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get("ratelimit-remaining").unwrap(), "0");

        let second = service
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().get("retry-after").is_some());
        assert_eq!(second.headers().get("ratelimit-limit").unwrap(), "1");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
