//! HTTP front door lifecycle.
//!
//! ```text
//! Stopped ──bind──▶ Listening ──signal──▶ Draining ──drained / grace elapsed──▶ Stopped
//! ```
//!
//! While draining, the listener is closed and in-flight requests get up to
//! the configured grace period. If they are still running after that, the
//! shutdown is reported as [`ShutdownOutcome::Forced`] and the process exits
//! without waiting for them.

use std::future::Future;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Front door state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Listening,
    Draining,
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request finished within the grace period.
    Clean,
    /// The grace period elapsed with requests still in flight.
    Forced,
}

impl ShutdownOutcome {
    /// Process exit status: 0 for a clean drain, 1 for a forced one.
    pub fn exit_code(self) -> ExitCode {
        match self {
            ShutdownOutcome::Clean => ExitCode::SUCCESS,
            ShutdownOutcome::Forced => ExitCode::FAILURE,
        }
    }
}

/// A bound, not yet serving, front door.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    grace_period: Duration,
    phase: watch::Sender<ServerPhase>,
}

impl Server {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BindError` if the address is invalid or in use.
    pub async fn bind(config: &Config, router: Router) -> AppResult<Self> {
        let addr = config.server_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AppError::BindError {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AppError::BindError { addr, source })?;

        let (phase, _) = watch::channel(ServerPhase::Stopped);

        Ok(Self {
            listener,
            local_addr,
            router,
            grace_period: config.shutdown_grace_period,
            phase,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerPhase> {
        self.phase.subscribe()
    }

    /// Serve until `shutdown` resolves, then drain.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ServerError` if the accept loop fails.
    pub async fn run<F>(self, shutdown: F) -> AppResult<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            local_addr,
            router,
            grace_period,
            phase,
        } = self;

        let drain = CancellationToken::new();
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(drain.clone().cancelled_owned());

        let mut server = tokio::spawn(async move { serve.await });
        enter(&phase, ServerPhase::Listening);
        info!(addr = %local_addr, "Server listening on http://{local_addr}");

        tokio::select! {
            result = &mut server => {
                enter(&phase, ServerPhase::Stopped);
                flatten(result)?;
                warn!("Server stopped without a shutdown signal");
                return Ok(ShutdownOutcome::Clean);
            }
            () = shutdown => {}
        }

        enter(&phase, ServerPhase::Draining);
        info!(
            grace_secs = grace_period.as_secs_f64(),
            "Draining in-flight requests"
        );
        drain.cancel();

        let outcome = match tokio::time::timeout(grace_period, &mut server).await {
            Ok(result) => {
                flatten(result)?;
                info!("All connections drained");
                ShutdownOutcome::Clean
            }
            Err(_) => {
                server.abort();
                error!(
                    grace_secs = grace_period.as_secs_f64(),
                    "Grace period elapsed, aborting remaining requests"
                );
                ShutdownOutcome::Forced
            }
        };

        enter(&phase, ServerPhase::Stopped);
        Ok(outcome)
    }
}

fn enter(phase: &watch::Sender<ServerPhase>, next: ServerPhase) {
    let previous = phase.send_replace(next);
    info!(from = ?previous, to = ?next, "Server phase changed");
}

fn flatten(result: Result<std::io::Result<()>, tokio::task::JoinError>) -> AppResult<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AppError::ServerError(e)),
        Err(e) => Err(AppError::ServerError(std::io::Error::other(e))),
    }
}
