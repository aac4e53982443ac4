//! # API Gateway
//!
//! A reverse proxy in front of a single backend service, featuring:
//!
//! - **Correlation**: Every request carries an `X-Request-Id`, reused or generated
//! - **Rate Limiting**: Fixed-window counter per client identity on `/api/*`
//! - **Forwarding**: Single-attempt upstream call bounded by timeout and body size
//! - **Observability**: One JSON log line per request phase, optional Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Access Log → Headers → Rate Limit) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, proxy, not found)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Forwarder (reqwest client, outcome classification)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Backend service (BACKEND_URL)                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use api_gateway::{AppState, Config, Server, build_router, utils};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), api_gateway::AppError> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config.clone())?;
//!     let server = Server::bind(&config, build_router(state.clone())).await?;
//!
//!     let outcome = server.run(utils::shutdown_signal()).await?;
//!     state.shutdown().await;
//!     println!("stopped: {outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```bash
//! RATE_LIMIT_MAX=100 RATE_LIMIT_WINDOW_SECS=60 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod state;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult, ProxyError};
pub use proxy::{Forwarder, ProxyOutcome};
pub use routes::build_router;
pub use server::{Server, ServerPhase, ShutdownOutcome};
pub use state::AppState;
