//! Catch-all forwarding handler for `/api` and `/api/*`.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::middleware::{RequestContext, RequestContextExt};
use crate::models::ErrorResponse;
use crate::proxy::InboundRequest;
use crate::state::AppState;

/// Forward the request to the backend and relay its answer.
///
/// Runs after the correlator, access logger and rate limiter. Produces
/// exactly one response: the relayed upstream response, or a gateway error.
pub async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    let ctx = request
        .request_context()
        .cloned()
        .unwrap_or_else(|| RequestContext::new(request.request_id()));

    let inbound = match InboundRequest::from_request(
        request,
        &state.trusted_proxies,
        state.config.max_body_size,
    )
    .await
    {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!(
                request_id = %ctx.request_id,
                error_kind = err.kind(),
                error = %err,
                "Rejected inbound request body"
            );
            return err.to_response(&ctx.request_id);
        }
    };

    state
        .forwarder
        .forward(inbound, &ctx)
        .await
        .into_response(&ctx.request_id)
}

/// Fallback for unknown routes outside `/api`.
pub async fn not_found(request: Request) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("not found", request.request_id())),
    )
        .into_response()
}
