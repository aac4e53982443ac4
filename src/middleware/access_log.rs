//! Structured access logging.
//!
//! Every event is a single JSON line on stdout (see `main.rs` for the
//! subscriber) carrying `service`, `request_id` and a `phase`:
//!
//! | phase               | emitted by                 | extra fields                      |
//! |---------------------|----------------------------|-----------------------------------|
//! | `request_received`  | [`track_requests`]         | method, path, client_ip, peer     |
//! | `rate_limited`      | rate limit layer           | client_ip, path, retry_after_secs |
//! | `upstream_dispatch` | forwarder, before the call | method, path, upstream_url        |
//! | `upstream_response` | forwarder, after the call  | upstream_url, status, duration_ms |
//! | `upstream_error`    | forwarder, on failure      | upstream_url, error_kind, error   |
//! | `request_completed` | [`track_requests`]         | method, path, status, duration_ms |
//!
//! The upstream URL is logged as `upstream_url`; `target` belongs to the
//! subscriber (module path).
//!
//! Logging is a side channel: emitting an event never fails the request.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, error, info, info_span, warn};

use super::ip::{TrustedProxyConfig, extract_client_ip, peer_addr};
use super::rate_limit::RateLimitDecision;
use super::request_id::{RequestContext, RequestContextExt};
use crate::error::ProxyError;
use crate::metrics;

/// Phase labels attached to every access log event.
pub mod phase {
    pub const REQUEST_RECEIVED: &str = "request_received";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UPSTREAM_DISPATCH: &str = "upstream_dispatch";
    pub const UPSTREAM_RESPONSE: &str = "upstream_response";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const REQUEST_COMPLETED: &str = "request_completed";
}

/// Whole milliseconds, saturating.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Emits the per-phase access log events.
///
/// Cheap to clone; shared by the middleware, the rate limiter and the
/// forwarder so every event carries the same `service` value.
#[derive(Debug, Clone)]
pub struct AccessLogger {
    service: Arc<str>,
}

impl AccessLogger {
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn request_received(
        &self,
        ctx: &RequestContext,
        method: &Method,
        path: &str,
        client_ip: &str,
        peer: &str,
    ) {
        info!(
            service = %self.service,
            request_id = %ctx.request_id,
            phase = phase::REQUEST_RECEIVED,
            method = %method,
            path,
            client_ip,
            peer,
            "Request received"
        );
    }

    pub fn rate_limited(
        &self,
        request_id: &str,
        client_ip: &str,
        path: &str,
        decision: &RateLimitDecision,
    ) {
        warn!(
            service = %self.service,
            request_id,
            phase = phase::RATE_LIMITED,
            client_ip,
            path,
            status = StatusCode::TOO_MANY_REQUESTS.as_u16(),
            retry_after_secs = decision.reset_secs(),
            "Rate limit exceeded for client"
        );
    }

    pub fn upstream_dispatch(
        &self,
        ctx: &RequestContext,
        method: &Method,
        path: &str,
        upstream_url: &str,
    ) {
        info!(
            service = %self.service,
            request_id = %ctx.request_id,
            phase = phase::UPSTREAM_DISPATCH,
            method = %method,
            path,
            upstream_url,
            "Forwarding request upstream"
        );
    }

    pub fn upstream_response(
        &self,
        ctx: &RequestContext,
        upstream_url: &str,
        status: StatusCode,
        elapsed: Duration,
    ) {
        info!(
            service = %self.service,
            request_id = %ctx.request_id,
            phase = phase::UPSTREAM_RESPONSE,
            upstream_url,
            status = status.as_u16(),
            duration_ms = duration_ms(elapsed),
            "Upstream responded"
        );
    }

    /// Upstream delivered a status line but the body broke off.
    pub fn upstream_partial(
        &self,
        ctx: &RequestContext,
        upstream_url: &str,
        status: StatusCode,
        detail: &str,
        elapsed: Duration,
    ) {
        warn!(
            service = %self.service,
            request_id = %ctx.request_id,
            phase = phase::UPSTREAM_RESPONSE,
            upstream_url,
            status = status.as_u16(),
            error = detail,
            duration_ms = duration_ms(elapsed),
            "Upstream response body incomplete, relaying partial response"
        );
    }

    pub fn upstream_error(
        &self,
        ctx: &RequestContext,
        upstream_url: &str,
        err: &ProxyError,
        elapsed: Duration,
    ) {
        error!(
            service = %self.service,
            request_id = %ctx.request_id,
            phase = phase::UPSTREAM_ERROR,
            upstream_url,
            status = err.status().as_u16(),
            error_kind = err.kind(),
            error = %err,
            duration_ms = duration_ms(elapsed),
            "Upstream request failed"
        );
    }

    /// Summary event. `status` is `None` when the caller went away before a
    /// response was produced.
    pub fn request_completed(
        &self,
        ctx: &RequestContext,
        method: &Method,
        path: &str,
        status: Option<StatusCode>,
    ) {
        let elapsed = ctx.elapsed();
        match status {
            Some(status) => info!(
                service = %self.service,
                request_id = %ctx.request_id,
                phase = phase::REQUEST_COMPLETED,
                method = %method,
                path,
                status = status.as_u16(),
                duration_ms = duration_ms(elapsed),
                "Request completed"
            ),
            None => warn!(
                service = %self.service,
                request_id = %ctx.request_id,
                phase = phase::REQUEST_COMPLETED,
                method = %method,
                path,
                outcome = "client_disconnected",
                duration_ms = duration_ms(elapsed),
                "Request abandoned by client"
            ),
        }
    }
}

/// Emits `request_completed` when dropped, on every exit path.
///
/// Dropping happens after the response is produced, or when the connection
/// task drops the pipeline future because the caller disconnected.
struct CompletionGuard {
    logger: AccessLogger,
    ctx: RequestContext,
    method: Method,
    path: String,
    status: Option<StatusCode>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.logger
            .request_completed(&self.ctx, &self.method, &self.path, self.status);

        let status = self
            .status
            .map_or_else(|| "aborted".to_string(), |s| s.as_u16().to_string());
        metrics::record_request_duration(
            self.method.as_str(),
            &status,
            self.ctx.elapsed().as_secs_f64(),
        );
    }
}

/// State for [`track_requests`].
#[derive(Debug, Clone)]
pub struct RequestTracking {
    pub logger: AccessLogger,
    /// Used to log the same client identity the rate limiter keys on
    pub trusted_proxies: Arc<TrustedProxyConfig>,
}

/// Middleware logging `request_received` and `request_completed`.
///
/// Must run inside [`RequestIdLayer`](super::RequestIdLayer) so the
/// [`RequestContext`] is available.
pub async fn track_requests(
    State(tracking): State<RequestTracking>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request
        .request_context()
        .cloned()
        .unwrap_or_else(|| RequestContext::new("unknown"));
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = extract_client_ip(&request, &tracking.trusted_proxies);
    let peer = peer_addr(&request).map_or_else(|| "unknown".to_string(), |a| a.to_string());
    let logger = tracking.logger;

    let span = info_span!("request", request_id = %ctx.request_id);

    async move {
        logger.request_received(&ctx, &method, &path, &client_ip, &peer);

        let mut guard = CompletionGuard {
            logger: logger.clone(),
            ctx,
            method,
            path,
            status: None,
        };

        let response = next.run(request).await;
        guard.status = Some(response.status());
        response
    }
    .instrument(span)
    .await
}
