//! Liveness endpoint.
//!
//! `GET /health` never touches the rate limiter or the forwarder, so it
//! answers `200 {"ok": true}` even while the backend is down or the caller
//! is over quota.

use axum::Json;

use crate::models::HealthResponse;

/// Liveness check.
///
/// # Response Body
///
/// ```json
/// { "ok": true }
/// ```
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::OK)
}
