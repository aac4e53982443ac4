//! Request correlation middleware.
//!
//! # Features
//!
//! - Reuses a non-empty inbound `X-Request-Id` header
//! - Generates a UUIDv4 otherwise
//! - Stores a [`RequestContext`] in the request extensions for every later stage
//! - Adds `X-Request-Id` to every response, error paths included
//!
//! # Client Usage
//!
//! Clients can provide their own request ID:
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:5921/api/users
//! ```
//!
//! The same ID will be returned in the response, forwarded to the backend,
//! and attached to every log event for the request.

use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fallback header value when request ID parsing fails.
/// Using `from_static` avoids runtime parsing and is infallible.
static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

/// Per-request correlation state, created at ingress.
///
/// Lives in the request extensions and is passed explicitly to the
/// forwarder. It is never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation ID for this request
    pub request_id: String,
    /// When the gateway received the request
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            started_at: Instant::now(),
        }
    }

    /// Time since the request was received.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    /// Create a new request ID layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = extract_or_generate_request_id(&req);
        let header_value = request_id
            .parse()
            .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone());

        // Normalize the request header so downstream stages see the chosen ID
        req.headers_mut()
            .insert(REQUEST_ID_HEADER, header_value.clone());
        req.extensions_mut().insert(RequestContext::new(request_id));

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response
                .headers_mut()
                .insert(REQUEST_ID_HEADER, header_value);
            Ok(response)
        })
    }
}

/// Extract request ID from headers or generate a new one.
pub fn extract_or_generate_request_id<B>(req: &Request<B>) -> String {
    if let Some(header_value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && !value.trim().is_empty()
    {
        return value.to_string();
    }

    Uuid::new_v4().to_string()
}

/// Extension trait to read the correlation state from a request.
pub trait RequestContextExt {
    /// Get the context inserted by [`RequestIdLayer`].
    fn request_context(&self) -> Option<&RequestContext>;

    /// Get the request ID, or `"unknown"` if the layer did not run.
    fn request_id(&self) -> &str {
        self.request_context()
            .map(|ctx| ctx.request_id.as_str())
            .unwrap_or("unknown")
    }
}

impl<B> RequestContextExt for Request<B> {
    fn request_context(&self) -> Option<&RequestContext> {
        self.extensions().get::<RequestContext>()
    }
}
