use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use api_gateway::{AppState, Config, Server, ShutdownOutcome, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration comes first since it carries the log level
    let config = Config::from_env();
    let level = config
        .as_ref()
        .map_or(utils::DEFAULT_LOG_LEVEL, |c| c.log_level.as_str());
    init_tracing(utils::log_filter(level));

    info!("Starting API gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return to_exit_code(e.exit_code());
        }
    };

    match run(config).await {
        Ok(outcome) => outcome.exit_code(),
        Err(exit_code) => to_exit_code(exit_code),
    }
}

/// One JSON object per line on stdout.
fn init_tracing(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn to_exit_code(code: exitcode::ExitCode) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Run the gateway, returning a sysexits code on error.
async fn run(config: Config) -> Result<ShutdownOutcome, exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        backend_url = %config.backend_url,
        upstream_timeout_secs = config.upstream_timeout.as_secs(),
        rate_limit_max = config.rate_limit_max,
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        service = %config.service_name,
        log_level = %config.log_level,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    // Build application state and router
    let state = AppState::new(config.clone()).map_err(|e| {
        error!("{e}");
        e.exit_code()
    })?;
    let app = build_router(state.clone());

    let server = Server::bind(&config, app).await.map_err(|e| {
        error!("{e}");
        e.exit_code()
    })?;

    info!("API endpoints:");
    info!("  GET  /health  - Liveness check");
    info!("  ANY  /api/*   - Forwarded to {}", config.backend_url);

    let outcome = server.run(utils::shutdown_signal()).await.map_err(|e| {
        error!("{e}");
        e.exit_code()
    })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!(outcome = ?outcome, "Gateway shutdown complete");
    Ok(outcome)
}
