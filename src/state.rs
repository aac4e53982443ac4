//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Forwarder**: Upstream HTTP client and forwarding policy
//! - **Rate Limiter**: Fixed-window table, absent when disabled
//! - **Configuration**: Runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks (the rate limit sweeper) are managed using
//! `tokio_util::task::TaskTracker` and `CancellationToken`. Call `shutdown()`
//! to stop them before application exit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::middleware::{AccessLogger, FixedWindowLimiter, TrustedProxyConfig};
use crate::proxy::Forwarder;

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Upstream forwarder
    pub forwarder: Arc<Forwarder>,
    /// Rate limiter; `None` when `RATE_LIMIT_MAX=0`
    pub limiter: Option<FixedWindowLimiter>,
    /// Networks whose forwarded headers are honored
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Access log emitter shared by every stage
    pub logger: AccessLogger,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build the state and start background tasks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for an invalid rate limit window and
    /// `AppError::ClientError` if the upstream client cannot be built.
    pub fn new(config: Config) -> AppResult<Self> {
        let logger = AccessLogger::new(&config.service_name);
        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));
        let forwarder = Arc::new(Forwarder::new(&config, logger.clone())?);

        let limiter = if config.rate_limiting_enabled() {
            let limiter = FixedWindowLimiter::new(config.rate_limit_max, config.rate_limit_window)
                .map_err(|e| AppError::ConfigError(e.to_string()))?;
            Some(limiter)
        } else {
            None
        };

        let state = Self {
            config: Arc::new(config),
            forwarder,
            limiter,
            trusted_proxies,
            logger,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if let Some(limiter) = &state.limiter {
            limiter.spawn_sweeper(&state.task_tracker, state.cancellation_token.clone());
        }

        Ok(state)
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Stopping background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}
