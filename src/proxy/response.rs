//! Upstream response capture and relay.

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName};
use axum::http::{Response, StatusCode};

/// Upstream response headers relayed to the caller. Everything else is dropped.
pub const RELAYED_HEADERS: [HeaderName; 2] = [CONTENT_TYPE, CONTENT_LENGTH];

/// A buffered upstream response, alive for one proxied call.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Allow-listed headers only
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Capture `status` and the allow-listed subset of `headers`.
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers: relayed_headers(headers),
            body,
        }
    }

    /// Drop `content-length`; used when the body is known to be truncated.
    pub fn without_content_length(mut self) -> Self {
        self.headers.remove(CONTENT_LENGTH);
        self
    }

    /// Relay status, allow-listed headers and body byte-for-byte.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Copy only [`RELAYED_HEADERS`] from `headers`.
pub fn relayed_headers(headers: &HeaderMap) -> HeaderMap {
    let mut relayed = HeaderMap::new();
    for name in &RELAYED_HEADERS {
        if let Some(value) = headers.get(name) {
            relayed.insert(name.clone(), value.clone());
        }
    }
    relayed
}
