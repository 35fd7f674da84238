use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::{middleware, routing::get, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use gribe_gateway::middleware::{auth_middleware, rate_limit_middleware};
use gribe_gateway::{routes, AppState, Config};

/// How long in-flight sessions get to wind down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Gribe - realtime speech-to-text gateway
#[derive(Parser, Debug)]
#[command(name = "gribe-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before config resolution.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration file");
            Config::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
        None => Config::from_env(),
    };

    info!(port = config.server.port, "starting gribe gateway");
    info!(
        max_buffer = config.audio.max_buffer_size,
        max_connections_per_ip = config.rate.max_connections_per_ip,
        "audio and rate limits"
    );
    if config.server.allowed_origins.is_empty() {
        info!("allowed origins: * (all)");
    } else {
        info!(origins = ?config.server.allowed_origins, "allowed origins");
    }
    if config.auth.api_keys.is_empty() {
        info!("authentication: disabled (no API keys configured)");
    } else {
        info!(keys = config.auth.api_keys.len(), "authentication: enabled");
    }
    if !config.asr.models.is_empty() {
        info!(
            models = ?config.asr.models.keys().collect::<Vec<_>>(),
            default = %config.asr.default_model,
            "ASR model catalogue"
        );
    }

    let address = config.address();
    let state = AppState::new(config);
    state.limiter.spawn_cleanup();

    // Layer order (outer to inner): rate limit -> auth -> handler. The
    // auth layer releases the limiter's connection slot on rejection.
    let realtime_routes = routes::realtime::create_realtime_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let app = Router::new()
        .merge(realtime_routes)
        .route("/health", get(routes::health))
        .with_state(state.clone());

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to listen on {address}"))?;
    info!(%address, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // Bounded drain, then release process-wide resources.
    tokio::time::timeout(SHUTDOWN_GRACE, state.close())
        .await
        .unwrap_or_else(|_| info!("shutdown grace period elapsed"));
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
