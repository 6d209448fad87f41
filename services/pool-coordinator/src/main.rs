//! Account Pool Coordinator
//!
//! Single-binary Rust service that:
//! 1. Loads the durable account store
//! 2. Ingests upstream rate-limit signals and applies cooldowns
//! 3. Reconciles account lifecycle states on a fixed interval
//! 4. Serves selection and activation APIs, plus a separate admin listener

mod admin;
mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use account_pool::{PoolEngine, PoolSettings, SystemClock, spawn_reconciler};
use account_store::AccountStore;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::api::ApiState;
use crate::config::Config;

/// How long in-flight requests get to finish once a shutdown signal lands.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting account-pool-coordinator");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        store_path = %config.store.path.display(),
        reconcile_interval_secs = config.pool.reconcile_interval_secs,
        "configuration loaded"
    );

    let store = Arc::new(
        AccountStore::load(config.store.path.clone())
            .await
            .with_context(|| {
                format!("failed to open account store at {}", config.store.path.display())
            })?,
    );
    info!(accounts = store.len().await, "account store opened");

    let engine = Arc::new(PoolEngine::new(
        store,
        Arc::new(SystemClock),
        PoolSettings {
            default_cooldown_secs: config.pool.default_cooldown_secs,
            availability_window_secs: config.pool.availability_window_secs,
        },
    ));

    let reconciler = spawn_reconciler(
        engine.clone(),
        Duration::from_secs(config.pool.reconcile_interval_secs),
    );

    let api_state = ApiState::new(engine.clone(), prometheus_handle);
    let app = api::build_api_router(api_state, config.server.max_connections);
    let admin_app = admin::build_admin_router(AdminState::new(engine));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.admin_listen_addr))?;

    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_listen_addr,
        "accepting requests"
    );

    // Graceful shutdown: on SIGTERM/SIGINT both listeners stop accepting and
    // drain in-flight requests, bounded by DRAIN_TIMEOUT. The timer starts
    // when the signal fires, not when the servers start, so each server gets
    // a oneshot it drains on.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (admin_shutdown_tx, admin_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    let admin_server_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async {
                let _ = admin_shutdown_rx.await;
            })
            .await
    });

    // Wait for the OS signal
    shutdown_signal().await;

    // The reconciler holds no in-flight work worth draining
    reconciler.abort();

    // Signal both servers to begin draining
    let _ = shutdown_tx.send(());
    let _ = admin_shutdown_tx.send(());

    // Enforce the drain timeout, counted from signal receipt
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for handle in [server_handle, admin_server_handle] {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
                Err(e) => error!(error = %e, "server task panicked"),
            }
        }
    })
    .await;

    match drained {
        Ok(()) => info!("all in-flight requests drained"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
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
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
