// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use anyhow::{anyhow, Context, Result};
use axum::{routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clusters;
mod config;
mod handlers;
mod metrics;
mod pool;
mod tap;
mod worker;

use clusters::ClustersFile;
use config::Config;
use handlers::{health_live, health_ready, health_startup, metrics_handler, AppState};
use metrics::Metrics;
use worker::WorkerSettings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config);

    tracing::info!(
        admin = %config.admin_addr()?,
        tap = %config.listen_addr,
        shadow_cluster = %config.shadow_cluster,
        version = thrift_shadow::VERSION,
        "starting shadow-gateway"
    );

    let clusters = ClustersFile::load(&config.clusters_file)
        .with_context(|| format!("loading {}", config.clusters_file))?;

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutting_down = Arc::new(AtomicBool::new(false));
    let tap_ready = Arc::new(AtomicBool::new(false));

    // Create metrics registry
    let metrics = Metrics::new(&config.stat_prefix)?;

    let tap_listener = std::net::TcpListener::bind(config.listen_addr()?)
        .with_context(|| format!("binding tap on {}", config.listen_addr))?;

    let worker = worker::spawn(
        WorkerSettings {
            listener: tap_listener,
            clusters,
            shadow_cluster: config.shadow_cluster.clone(),
            transport: config.transport_type()?,
            protocol: config.protocol_type()?,
            timeouts: config.pool_timeouts(),
            metrics: metrics.clone(),
        },
        shutdown_tx.subscribe(),
        Arc::clone(&tap_ready),
    )?;

    // Create app state for health endpoints
    let app_state = AppState {
        tap_ready,
        shutting_down: Arc::clone(&shutting_down),
    };

    // Build admin router
    let app = Router::new()
        .route("/health/live", get(health_live))
        .route("/health/startup", get(health_startup))
        .route("/health/ready", get(health_ready).with_state(app_state))
        .route("/metrics", get(metrics_handler).with_state(metrics))
        .layer(TraceLayer::new_for_http());

    let addr = config.admin_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "admin server listening");

    // Spawn graceful shutdown handler
    let shutdown_tx_clone = shutdown_tx.clone();
    let shutting_down_clone = Arc::clone(&shutting_down);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, initiating graceful shutdown");

        // Mark as shutting down (health check will return not ready)
        shutting_down_clone.store(true, Ordering::SeqCst);

        // Give the load balancer a moment to observe the readiness change
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Signal all tasks to stop
        let _ = shutdown_tx_clone.send(());
    });

    // Run server with graceful shutdown
    let mut admin_shutdown = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = admin_shutdown.recv().await;
        })
        .await?;

    tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow!("shadow worker panicked"))??;

    tracing::info!("shadow-gateway stopped");
    Ok(())
}

/// Initialize tracing based on configuration.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
