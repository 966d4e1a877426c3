// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Shadow worker thread.
//!
//! The shadow writer, its routers and the connection pools are
//! single-threaded, so they run on a dedicated current-thread runtime
//! inside a `LocalSet`. Only the metrics registry and the readiness flag
//! are shared with the admin server.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use thrift_shadow::{ProtocolType, ShadowWriter, TransportType};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::LocalSet;

use crate::clusters::{ClustersFile, StaticClusterManager};
use crate::metrics::Metrics;
use crate::pool::PoolTimeouts;
use crate::tap::{self, TapContext, MAX_BUFFERED};

/// Everything the worker needs, built on the main thread.
pub struct WorkerSettings {
    /// Tap listener, bound up front so that address errors surface at startup
    pub listener: std::net::TcpListener,
    pub clusters: ClustersFile,
    pub shadow_cluster: String,
    pub transport: TransportType,
    pub protocol: ProtocolType,
    pub timeouts: PoolTimeouts,
    pub metrics: Metrics,
}

/// Start the worker thread. `ready` is raised once the tap accepts
/// connections and lowered when it stops.
pub fn spawn(
    settings: WorkerSettings,
    shutdown: broadcast::Receiver<()>,
    ready: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<Result<()>>> {
    settings
        .listener
        .set_nonblocking(true)
        .context("tap listener")?;

    let handle = thread::Builder::new()
        .name("shadow-worker".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("worker runtime")?;
            let local = LocalSet::new();
            local.block_on(&runtime, run(settings, shutdown, ready))
        })
        .context("spawning shadow worker")?;

    Ok(handle)
}

async fn run(settings: WorkerSettings, shutdown: broadcast::Receiver<()>, ready: Arc<AtomicBool>) -> Result<()> {
    let WorkerSettings {
        listener,
        clusters,
        shadow_cluster,
        transport,
        protocol,
        timeouts,
        metrics,
    } = settings;

    let manager = StaticClusterManager::new(&clusters, timeouts, &metrics)?;
    if manager.cluster(&shadow_cluster).is_none() {
        tracing::warn!(cluster = %shadow_cluster, "shadow cluster is not defined, requests will be skipped");
    }

    let listener = TcpListener::from_std(listener).context("tap listener")?;
    let ctx = Rc::new(TapContext {
        writer: ShadowWriter::new(Rc::new(manager), metrics.shadow_stats()),
        cluster: shadow_cluster,
        transport,
        protocol,
        max_buffered: MAX_BUFFERED,
        metrics,
    });

    tracing::info!(
        address = %listener.local_addr()?,
        cluster = %ctx.cluster,
        transport = %transport.as_str(),
        protocol = %protocol.as_str(),
        "tap listening"
    );
    ready.store(true, Ordering::SeqCst);

    tap::serve(listener, Rc::clone(&ctx), shutdown).await;

    ready.store(false, Ordering::SeqCst);
    tracing::info!(in_flight = ctx.writer.active_routers(), "shadow worker stopped");
    Ok(())
}
