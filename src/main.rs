//! Snapcache - memory-aware image caching
//!
//! Runs the image service behind a small HTTP surface for local use and
//! diagnostics.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snapcache::api::{create_router, AppState};
use snapcache::{spawn_cleanup_task, spawn_monitor_task, Config};

/// Main entry point for the Snapcache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the image service (accountant, processor, cache, lifecycle)
/// 4. Start the periodic cleanup and health monitor tasks
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snapcache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Snapcache image service");

    let config = Config::from_env();
    info!(
        "Configuration loaded: memory_limit={}B, max_cache_size={}B, max_entries={}, expiry={}s, port={}",
        config.memory_limit,
        config.max_cache_size,
        config.max_entries,
        config.expiry_secs,
        config.server_port
    );

    let state = AppState::from_config(&config);
    info!("Image service initialized, temp dir {}", config.temp_dir.display());

    let cleanup_handle = spawn_cleanup_task(
        state.service.cache.clone(),
        Duration::from_secs(config.cleanup_interval),
    );
    let (monitor_handle, _health) = spawn_monitor_task(
        state.service.clone(),
        Duration::from_secs(config.monitor_interval),
    )
    .await;
    info!("Background tasks started");

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(vec![cleanup_handle, monitor_handle]))
        .await
        .context("server error")?;

    // Leave no compressed outputs behind
    state.service.lifecycle.force_cleanup().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the background tasks and allows graceful
/// shutdown.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for task in tasks {
        task.abort();
    }
    warn!("Background tasks aborted");
}
