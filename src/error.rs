use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Process-level error types.
///
/// These surface during startup and shutdown. None of them is produced
/// while handling a request; per-request failures are [`ProxyError`].
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to bind {addr}: {source}")]
    BindError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build upstream client: {0}")]
    ClientError(String),

    #[error("Server error: {0}")]
    ServerError(#[from] std::io::Error),
}

impl AppError {
    /// BSD sysexits code used as the process exit status for this error.
    pub fn exit_code(&self) -> exitcode::ExitCode {
        match self {
            AppError::ConfigError(_) => exitcode::CONFIG,
            AppError::BindError { .. } => exitcode::UNAVAILABLE,
            AppError::ClientError(_) | AppError::ServerError(_) => exitcode::SOFTWARE,
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

/// Failure to obtain a relayable upstream response.
///
/// Every variant maps to exactly one gateway status code. An upstream that
/// answers with 4xx/5xx is not a `ProxyError`; that response is relayed.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Connection refused, DNS failure, or any other connect-phase error.
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// No complete response within the configured timeout.
    #[error("Upstream timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Inbound body exceeded the configured maximum.
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Inbound body could not be read from the client.
    #[error("Failed to read request body: {0}")]
    InvalidBody(String),

    /// Any other transport fault.
    #[error("Upstream request failed: {0}")]
    Unclassified(String),
}

impl ProxyError {
    /// Status code the gateway answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unclassified(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Unreachable(_) => "unreachable",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::PayloadTooLarge { .. } => "payload_too_large",
            ProxyError::InvalidBody(_) => "invalid_body",
            ProxyError::Unclassified(_) => "unclassified",
        }
    }

    /// Build the stable JSON error response for this failure.
    ///
    /// Connection details stay in the logs; the body only carries a fixed
    /// error label, a generic message, and the request ID.
    pub fn to_response(&self, request_id: &str) -> Response {
        let body = match self {
            ProxyError::Unreachable(_) => ErrorResponse::with_message(
                "Backend service unavailable",
                "The backend service could not be reached. Please try again later.",
                request_id,
            ),
            ProxyError::Timeout(_) => ErrorResponse::with_message(
                "Backend service timeout",
                "The backend service did not respond in time. Please try again.",
                request_id,
            ),
            ProxyError::PayloadTooLarge { limit } => ErrorResponse::with_message(
                "payload too large",
                &format!("Request body must not exceed {limit} bytes"),
                request_id,
            ),
            ProxyError::InvalidBody(_) => ErrorResponse::with_message(
                "invalid request body",
                "The request body could not be read.",
                request_id,
            ),
            ProxyError::Unclassified(_) => ErrorResponse::new("bad gateway", request_id),
        };

        (self.status(), Json(body)).into_response()
    }
}
