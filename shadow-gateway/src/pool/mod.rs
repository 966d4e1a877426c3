// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Upstream TCP connection pooling.
//!
//! Pools live on the worker thread and hand connections out through the
//! callback interface of the shadow library. A connection handed back in a
//! usable state is parked and reused, together with its Thrift connection
//! state, by the next request for the same cluster.
//!
//! A lent connection that receives callbacks must see its response within
//! the pool's response timeout. Past it the connection is closed, which
//! fails whoever is waiting on it.

mod connection;

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use thrift_shadow::upstream::{
    CancelPolicy, Cancellable, ClientConnection, CloseType, ConnectionData, ConnectionPool, ConnectionState,
    PoolCallbacks, PoolFailureReason, UpstreamCallbacks, UpstreamHost,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::metrics::Metrics;

pub use connection::TcpClientConnection;

/// Idle connections older than this are closed instead of reused.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect and response deadlines of a pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolTimeouts {
    pub connect: Duration,
    pub response: Duration,
}

struct IdleConnection {
    connection: Rc<TcpClientConnection>,
    state: Option<ConnectionState>,
    host: UpstreamHost,
    parked_at: Instant,
}

impl IdleConnection {
    fn is_usable(&self, now: Instant) -> bool {
        !self.connection.is_closed() && now.duration_since(self.parked_at) < IDLE_TIMEOUT
    }
}

type IdleList = RefCell<Vec<IdleConnection>>;

/// Round-robin TCP pool over the hosts of one cluster.
pub struct TcpConnectionPool {
    cluster: String,
    hosts: Vec<SocketAddr>,
    next_host: Cell<usize>,
    timeouts: PoolTimeouts,
    idle: Rc<IdleList>,
    metrics: Metrics,
}

impl TcpConnectionPool {
    pub fn new(cluster: &str, hosts: Vec<SocketAddr>, timeouts: PoolTimeouts, metrics: Metrics) -> Self {
        Self {
            cluster: cluster.to_string(),
            hosts,
            next_host: Cell::new(0),
            timeouts,
            idle: Rc::new(RefCell::new(Vec::new())),
            metrics,
        }
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.borrow().len()
    }

    fn pick_host(&self) -> Option<UpstreamHost> {
        if self.hosts.is_empty() {
            return None;
        }
        let index = self.next_host.get();
        self.next_host.set((index + 1) % self.hosts.len());
        Some(UpstreamHost::new(&self.cluster, self.hosts[index]))
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        let now = Instant::now();
        let mut idle = self.idle.borrow_mut();
        while let Some(entry) = idle.pop() {
            if entry.is_usable(now) {
                return Some(entry);
            }
            // Dropping the entry aborts its tasks.
            tracing::trace!(cluster = %self.cluster, peer = %entry.connection.peer(), "discarding stale connection");
        }
        None
    }
}

impl ConnectionPool for TcpConnectionPool {
    fn new_connection(&self, callbacks: Rc<dyn PoolCallbacks>) -> Option<Box<dyn Cancellable>> {
        tracing::trace!(cluster = %self.cluster, idle = self.idle_connections(), "connection requested");
        if let Some(entry) = self.take_idle() {
            self.metrics.record_pool_connect(&self.cluster, "reused");
            let host = entry.host.clone();
            let data = PooledConnection::new(
                entry.connection,
                entry.state,
                host.clone(),
                Rc::downgrade(&self.idle),
                self.timeouts.response,
                self.metrics.clone(),
            );
            callbacks.on_pool_ready(Box::new(data), host);
            return None;
        }

        let Some(host) = self.pick_host() else {
            callbacks.on_pool_failure(PoolFailureReason::LocalConnectionFailure, "cluster has no hosts", None);
            return None;
        };

        let timeout = self.timeouts.connect;
        let response_timeout = self.timeouts.response;
        let idle = Rc::downgrade(&self.idle);
        let metrics = self.metrics.clone();
        let cluster = self.cluster.clone();

        let task = tokio::task::spawn_local(async move {
            let outcome = tokio::time::timeout(timeout, TcpStream::connect(host.address)).await;
            let stream = match outcome {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    metrics.record_pool_connect(&cluster, "refused");
                    callbacks.on_pool_failure(PoolFailureReason::RemoteConnectionFailure, &e.to_string(), Some(host));
                    return;
                }
                Err(_) => {
                    metrics.record_pool_connect(&cluster, "timeout");
                    callbacks.on_pool_failure(PoolFailureReason::Timeout, "connect timed out", Some(host));
                    return;
                }
            };

            match TcpClientConnection::spawn(stream) {
                Ok(connection) => {
                    metrics.record_pool_connect(&cluster, "connected");
                    tracing::debug!(cluster = %cluster, peer = %host.address, "upstream connected");
                    let data = PooledConnection::new(
                        connection,
                        None,
                        host.clone(),
                        idle,
                        response_timeout,
                        metrics,
                    );
                    callbacks.on_pool_ready(Box::new(data), host);
                }
                Err(e) => {
                    metrics.record_pool_connect(&cluster, "refused");
                    callbacks.on_pool_failure(PoolFailureReason::LocalConnectionFailure, &e.to_string(), Some(host));
                }
            }
        });

        Some(Box::new(PendingConnect { task: Some(task) }))
    }
}

/// Handle on a connect still in progress.
struct PendingConnect {
    task: Option<JoinHandle<()>>,
}

impl Cancellable for PendingConnect {
    fn cancel(&mut self, policy: CancelPolicy) {
        if let Some(task) = self.task.take() {
            tracing::trace!(policy = ?policy, "cancelling pending connect");
            task.abort();
        }
    }
}

/// A connection lent to one request. Dropping it parks the connection in
/// the pool unless it was closed.
struct PooledConnection {
    connection: Rc<TcpClientConnection>,
    state: RefCell<Option<ConnectionState>>,
    host: UpstreamHost,
    idle: Weak<IdleList>,
    response_timeout: Duration,
    metrics: Metrics,
    deadline: RefCell<Option<JoinHandle<()>>>,
}

impl PooledConnection {
    fn new(
        connection: Rc<TcpClientConnection>,
        state: Option<ConnectionState>,
        host: UpstreamHost,
        idle: Weak<IdleList>,
        response_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            connection,
            state: RefCell::new(state),
            host,
            idle,
            response_timeout,
            metrics,
            deadline: RefCell::new(None),
        }
    }

    /// Close the connection unless the lease ends within the response
    /// timeout. Closing reports `LocalClose` to the attached callbacks.
    fn arm_deadline(&self) {
        let connection = Rc::downgrade(&self.connection);
        let timeout = self.response_timeout;
        let metrics = self.metrics.clone();
        let cluster = self.host.cluster.clone();

        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            let Some(connection) = connection.upgrade() else {
                return;
            };
            if connection.is_closed() {
                return;
            }
            tracing::warn!(
                cluster = %cluster,
                peer = %connection.peer(),
                timeout_ms = timeout.as_millis() as u64,
                "no upstream response in time, closing connection"
            );
            metrics.record_response_timeout(&cluster);
            connection.close(CloseType::NoFlush);
        });

        if let Some(previous) = self.deadline.replace(Some(task)) {
            previous.abort();
        }
    }
}

impl ConnectionData for PooledConnection {
    fn connection(&self) -> Rc<dyn ClientConnection> {
        Rc::clone(&self.connection) as Rc<dyn ClientConnection>
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        self.state.borrow().clone()
    }

    fn set_connection_state(&self, state: ConnectionState) {
        *self.state.borrow_mut() = Some(state);
    }

    fn add_upstream_callbacks(&self, callbacks: Weak<dyn UpstreamCallbacks>) {
        self.connection.set_callbacks(callbacks);
        self.arm_deadline();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(deadline) = self.deadline.get_mut().take() {
            deadline.abort();
        }
        self.connection.clear_callbacks();
        if self.connection.is_closed() {
            return;
        }
        let Some(idle) = self.idle.upgrade() else {
            return;
        };
        idle.borrow_mut().push(IdleConnection {
            connection: Rc::clone(&self.connection),
            state: self.state.get_mut().take(),
            host: self.host.clone(),
            parked_at: Instant::now(),
        });
    }
}
