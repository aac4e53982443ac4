//! Upstream forwarding core.
//!
//! # Pipeline
//!
//! ```text
//! InboundRequest + RequestContext
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ build upstream call  │  base URL + path?query, forwarding headers
//! └──────────┬───────────┘
//!            │  upstream_dispatch
//!            ▼
//! ┌──────────────────────┐
//! │ send + read body     │  single attempt, bounded by timeout and body size
//! └──────────┬───────────┘
//!            │  upstream_response / upstream_error
//!            ▼
//!     ProxyOutcome ──▶ Response
//! ```
//!
//! # Outcomes
//!
//! | Upstream behaviour                   | Gateway answer                    |
//! |--------------------------------------|-----------------------------------|
//! | any HTTP status, body complete       | relayed status and body           |
//! | status received, body stream broke   | relayed status, partial body      |
//! | connection refused / unreachable     | 503 `Backend service unavailable` |
//! | no full response within the timeout  | 504 `Backend service timeout`     |
//! | anything else                        | 502 `bad gateway`                 |
//!
//! The whole upstream response is buffered before the gateway produces its
//! own response, so every failure is classified before anything is written
//! to the caller and each request yields exactly one response.
//!
//! # Cancellation
//!
//! If the caller disconnects, hyper drops the handler future, which drops the
//! in-flight `reqwest` future and closes the upstream connection.

mod request;
mod response;

use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{Response, StatusCode};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, ProxyError};
use crate::metrics;
use crate::middleware::{AccessLogger, RequestContext};

pub use request::{InboundRequest, X_FORWARDED_FOR, X_FORWARDED_PROTO, target_url, upstream_headers};
pub use response::{RELAYED_HEADERS, UpstreamResponse, relayed_headers};

/// Result of one forwarding attempt.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// Upstream answered; relay verbatim (any status).
    Forwarded(UpstreamResponse),
    /// Upstream sent a status line, then the body failed part-way.
    Partial {
        response: UpstreamResponse,
        detail: String,
    },
    /// No relayable upstream response.
    Failed(ProxyError),
}

impl ProxyOutcome {
    /// Status the caller will see.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyOutcome::Forwarded(response) | ProxyOutcome::Partial { response, .. } => {
                response.status
            }
            ProxyOutcome::Failed(err) => err.status(),
        }
    }

    /// Convert into the single response written for this request.
    pub fn into_response(self, request_id: &str) -> Response<Body> {
        match self {
            ProxyOutcome::Forwarded(response) => response.into_response(),
            ProxyOutcome::Partial { response, .. } => {
                response.without_content_length().into_response()
            }
            ProxyOutcome::Failed(err) => err.to_response(request_id),
        }
    }
}

/// Failure inside the timed section of an upstream call.
enum CallFailure {
    /// No response head was received.
    Transport(reqwest::Error),
    /// Head received; body failed or exceeded the limit.
    Body {
        status: StatusCode,
        headers: reqwest::header::HeaderMap,
        received: Vec<u8>,
        detail: String,
        over_limit: bool,
    },
}

/// Forwards requests to the single configured backend.
///
/// Cheap to clone; the `reqwest::Client` connection pool is shared.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_body_size: usize,
    logger: AccessLogger,
}

impl Forwarder {
    /// Build a forwarder from the gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(config: &Config, logger: AccessLogger) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            // Redirects are relayed to the caller, not followed
            .redirect(Policy::none())
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.backend_url.clone(),
            timeout: config.upstream_timeout,
            max_body_size: config.max_body_size,
            logger,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Forward `inbound` upstream once and classify the result.
    pub async fn forward(&self, inbound: InboundRequest, ctx: &RequestContext) -> ProxyOutcome {
        let target = target_url(&self.base_url, &inbound.path_and_query);
        let headers = upstream_headers(&inbound, ctx);

        let mut builder = self
            .client
            .request(inbound.method.clone(), &target)
            .headers(headers);
        if !inbound.body.is_empty() {
            builder = builder.body(inbound.body.clone());
        }

        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => {
                let err = ProxyError::Unclassified(e.to_string());
                self.logger
                    .upstream_error(ctx, &target, &err, Duration::ZERO);
                return ProxyOutcome::Failed(err);
            }
        };

        self.logger
            .upstream_dispatch(ctx, &inbound.method, inbound.path(), &target);

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.execute(request)).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Err(_elapsed) => ProxyOutcome::Failed(ProxyError::Timeout(self.timeout)),
            Ok(Ok(response)) => ProxyOutcome::Forwarded(response),
            Ok(Err(failure)) => self.classify(failure),
        };

        match &outcome {
            ProxyOutcome::Forwarded(response) => {
                self.logger
                    .upstream_response(ctx, &target, response.status, elapsed);
                metrics::record_upstream("forwarded", response.status.as_u16(), elapsed.as_secs_f64());
            }
            ProxyOutcome::Partial { response, detail } => {
                self.logger
                    .upstream_partial(ctx, &target, response.status, detail, elapsed);
                metrics::record_upstream("partial", response.status.as_u16(), elapsed.as_secs_f64());
            }
            ProxyOutcome::Failed(err) => {
                self.logger.upstream_error(ctx, &target, err, elapsed);
                metrics::record_upstream(err.kind(), err.status().as_u16(), elapsed.as_secs_f64());
            }
        }

        outcome
    }

    /// Send the request and buffer the response body up to `max_body_size`.
    async fn execute(&self, request: reqwest::Request) -> Result<UpstreamResponse, CallFailure> {
        let mut response = self
            .client
            .execute(request)
            .await
            .map_err(CallFailure::Transport)?;

        let status = response.status();
        let headers = response.headers().clone();

        if let Some(length) = response.content_length()
            && !usize::try_from(length).is_ok_and(|l| l <= self.max_body_size)
        {
            return Err(CallFailure::Body {
                status,
                headers,
                received: Vec::new(),
                detail: format!("content-length {length} exceeds {} bytes", self.max_body_size),
                over_limit: true,
            });
        }

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > self.max_body_size {
                        return Err(CallFailure::Body {
                            status,
                            headers,
                            received: body,
                            detail: format!("body exceeds {} bytes", self.max_body_size),
                            over_limit: true,
                        });
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) if e.is_timeout() => return Err(CallFailure::Transport(e)),
                Err(e) => {
                    return Err(CallFailure::Body {
                        status,
                        headers,
                        received: body,
                        detail: e.to_string(),
                        over_limit: false,
                    });
                }
            }
        }

        Ok(UpstreamResponse::new(status, &headers, Bytes::from(body)))
    }

    fn classify(&self, failure: CallFailure) -> ProxyOutcome {
        match failure {
            CallFailure::Transport(e) => ProxyOutcome::Failed(classify_transport_error(&e, self.timeout)),
            CallFailure::Body {
                status,
                detail,
                over_limit: true,
                ..
            } => {
                debug!(status = status.as_u16(), %detail, "Upstream body over limit");
                ProxyOutcome::Failed(ProxyError::Unclassified(format!(
                    "upstream responded {status} but {detail}"
                )))
            }
            CallFailure::Body {
                status,
                headers,
                received,
                detail,
                over_limit: false,
            } => ProxyOutcome::Partial {
                response: UpstreamResponse::new(status, &headers, Bytes::from(received)),
                detail,
            },
        }
    }
}

/// Map a `reqwest` error raised before any response head arrived.
pub fn classify_transport_error(err: &reqwest::Error, timeout: Duration) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout(timeout)
    } else if err.is_connect() {
        ProxyError::Unreachable(err.to_string())
    } else {
        ProxyError::Unclassified(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};

    fn inbound(path: &str) -> InboundRequest {
        InboundRequest {
            method: Method::GET,
            path_and_query: path.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_ip: "127.0.0.1".to_string(),
            proto: "http".to_string(),
        }
    }

    fn forwarder(base_url: &str) -> Forwarder {
        let config = Config {
            backend_url: base_url.to_string(),
            upstream_timeout: Duration::from_secs(2),
            ..Config::default()
        };
        Forwarder::new(&config, AccessLogger::new("test")).unwrap()
    }

    /// Port with nothing listening: bind an ephemeral port, then release it.
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let forwarder = forwarder(&format!("http://127.0.0.1:{}", closed_port()));
        let ctx = RequestContext::new("refused");

        let outcome = forwarder.forward(inbound("/api/x"), &ctx).await;

        assert!(matches!(outcome, ProxyOutcome::Failed(ProxyError::Unreachable(_))));
        assert_eq!(outcome.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        // Accepts the connection but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let config = Config {
            backend_url: format!("http://{addr}"),
            upstream_timeout: Duration::from_millis(200),
            ..Config::default()
        };
        let forwarder = Forwarder::new(&config, AccessLogger::new("test")).unwrap();

        let started = Instant::now();
        let outcome = forwarder
            .forward(inbound("/api/slow"), &RequestContext::new("slow"))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(outcome, ProxyOutcome::Failed(ProxyError::Timeout(_))));
        assert_eq!(outcome.status(), StatusCode::GATEWAY_TIMEOUT);
        hold.abort();
    }

    #[tokio::test]
    async fn test_partial_outcome_drops_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "100".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());

        let outcome = ProxyOutcome::Partial {
            response: UpstreamResponse::new(StatusCode::OK, &headers, Bytes::from_static(b"par")),
            detail: "connection reset".to_string(),
        };
        let response = outcome.into_response("id");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"par");
    }

    #[test]
    fn test_forwarder_keeps_base_url() {
        let forwarder = forwarder("http://backend:5920");
        assert_eq!(forwarder.base_url(), "http://backend:5920");
        assert_eq!(forwarder.max_body_size(), 50 * 1024 * 1024);
    }
}
