use serde::Serialize;

/// Liveness response body: `{"ok": true}`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

impl HealthResponse {
    pub const OK: Self = Self { ok: true };
}

/// Error body produced by the gateway itself (never by the upstream).
///
/// ```json
/// {
///   "error": "Backend service unavailable",
///   "message": "The backend service could not be reached. Please try again later.",
///   "requestId": "3f0c3a4e-8f0b-4d7e-9e0c-2f8a4b1d6c55"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Stable, machine-matchable error label
    pub error: String,
    /// Human-readable explanation, omitted for unclassified failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Correlation ID of the failed request
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(error: &str, request_id: &str) -> Self {
        Self {
            error: error.to_string(),
            message: None,
            request_id: request_id.to_string(),
        }
    }

    pub fn with_message(error: &str, message: &str, request_id: &str) -> Self {
        Self {
            error: error.to_string(),
            message: Some(message.to_string()),
            request_id: request_id.to_string(),
        }
    }
}
