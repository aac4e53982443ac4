//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Reuses or generates X-Request-Id
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Access Log     │ ← request_received / request_completed
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← Fixed hardening headers on every response
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← 500 instead of a dropped connection
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (/api routes only)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Liveness (never rate limited)
//! - `/api`, `/api/*` - Forwarded to the backend, any method

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{any, get};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    RateLimitLayer, RequestIdLayer, RequestTracking, apply_security_headers, track_requests,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Rate limiting is attached with `route_layer`, so it only runs for the
/// forwarding routes and never for `/health` or the 404 fallback.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    // =========================================================================
    // Forwarding Routes
    // =========================================================================
    let mut api = Router::new()
        .route("/api", any(handlers::proxy))
        .route("/api/", any(handlers::proxy))
        .route("/api/{*path}", any(handlers::proxy));

    if let Some(limiter) = &state.limiter {
        info!(
            max = limiter.limit(),
            window_secs = limiter.window().as_secs(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        api = api.route_layer(RateLimitLayer::new(
            limiter.clone(),
            state.trusted_proxies.clone(),
            state.logger.clone(),
        ));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_MAX=0)");
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api)
        .fallback(handlers::not_found);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_bytes = config.max_body_size,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_body_size));

    // 2. Panics become a 500 that still passes through the layers below
    router = router.layer(CatchPanicLayer::new());

    // 3. Security headers
    router = apply_security_headers(router);

    // 4. Access log
    let tracking = RequestTracking {
        logger: state.logger.clone(),
        trusted_proxies: state.trusted_proxies.clone(),
    };
    router = router.layer(from_fn_with_state(tracking, track_requests));

    // 5. Request ID - outermost, so every response carries it
    router = router.layer(RequestIdLayer::new());

    router.with_state(state)
}
