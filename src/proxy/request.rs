//! Inbound request capture and upstream request construction.

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};

use crate::error::ProxyError;
use crate::middleware::{REQUEST_ID_HEADER, RequestContext, TrustedProxyConfig};
use crate::middleware::{extract_client_ip, forwarded_proto};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// A fully buffered inbound request, owned by one pipeline invocation.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path plus query string, exactly as received
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Resolved client identity (see [`extract_client_ip`])
    pub client_ip: String,
    /// Protocol the client used to reach the edge
    pub proto: String,
}

impl InboundRequest {
    /// Buffer `request` into an `InboundRequest`.
    ///
    /// The body limit is taken from the `DefaultBodyLimit` layer on the router.
    ///
    /// # Errors
    ///
    /// `ProxyError::PayloadTooLarge` if the body exceeds `max_body_size`,
    /// `ProxyError::InvalidBody` if it cannot be read.
    pub async fn from_request(
        request: Request,
        trusted_proxies: &TrustedProxyConfig,
        max_body_size: usize,
    ) -> Result<Self, ProxyError> {
        let client_ip = extract_client_ip(&request, trusted_proxies).into_owned();
        let proto = forwarded_proto(&request, trusted_proxies);
        let method = request.method().clone();
        let path_and_query = request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());
        let headers = request.headers().clone();

        let body = Bytes::from_request(request, &()).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ProxyError::PayloadTooLarge {
                    limit: max_body_size,
                }
            } else {
                ProxyError::InvalidBody(rejection.body_text())
            }
        })?;

        Ok(Self {
            method,
            path_and_query,
            headers,
            body,
            client_ip,
            proto,
        })
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }
}

/// Concatenate the backend base URL with the inbound path and query.
///
/// No rewriting and no slash normalization: `http://b:1/v1` + `/api/x?q=1`
/// is `http://b:1/v1/api/x?q=1`.
pub fn target_url(base_url: &str, path_and_query: &str) -> String {
    format!("{base_url}{path_and_query}")
}

/// Headers sent upstream.
///
/// Built from scratch rather than filtered from the inbound set, so `Host`,
/// `Connection` and every other hop-by-hop header never reach the backend.
pub fn upstream_headers(inbound: &InboundRequest, ctx: &RequestContext) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(&inbound.client_ip) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&inbound.proto) {
        headers.insert(X_FORWARDED_PROTO, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    if !inbound.body.is_empty()
        && let Some(content_type) = inbound.headers.get(CONTENT_TYPE)
        && !content_type.is_empty()
    {
        headers.insert(CONTENT_TYPE, content_type.clone());
    }

    headers
}
