// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Interfaces consumed from the cluster manager and its connection pools.
//!
//! Everything here runs on a single worker thread: handles are `Rc`, and
//! callbacks fire on the thread that issued the request.

mod conn_state;

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use bytes::BytesMut;

use crate::protocol::ProtocolType;

pub use conn_state::ThriftConnectionState;

/// Session data a pool keeps per physical connection.
pub type ConnectionState = Rc<dyn Any>;

/// Registry of the clusters visible to this worker.
pub trait ClusterManager {
    fn get_thread_local_cluster(&self, name: &str) -> Option<Rc<dyn ThreadLocalCluster>>;
}

pub trait ThreadLocalCluster {
    fn name(&self) -> &str;

    /// A cluster in maintenance must not receive new traffic.
    fn maintenance_mode(&self) -> bool;

    /// TCP pool for `protocol`, or `None` when no healthy host is available.
    fn tcp_conn_pool(&self, protocol: ProtocolType) -> Option<Rc<dyn ConnectionPool>>;
}

pub trait ConnectionPool {
    /// Ask for a connection.
    ///
    /// The pool either resolves the request before returning (by invoking
    /// `callbacks`) and returns `None`, or returns a handle that cancels the
    /// pending request.
    fn new_connection(&self, callbacks: Rc<dyn PoolCallbacks>) -> Option<Box<dyn Cancellable>>;
}

/// How a pending connection request should be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Keep a connection that is already being established for later use.
    Default,
    /// Abort the connection attempt as well.
    CloseExcess,
}

pub trait Cancellable {
    fn cancel(&mut self, policy: CancelPolicy);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFailureReason {
    Overflow,
    LocalConnectionFailure,
    RemoteConnectionFailure,
    Timeout,
}

impl PoolFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::LocalConnectionFailure => "local_connection_failure",
            Self::RemoteConnectionFailure => "remote_connection_failure",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for PoolFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream host selected by a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamHost {
    pub cluster: String,
    pub address: SocketAddr,
}

impl UpstreamHost {
    pub fn new(cluster: &str, address: SocketAddr) -> Self {
        Self {
            cluster: cluster.to_string(),
            address,
        }
    }
}

pub trait PoolCallbacks {
    fn on_pool_ready(&self, conn_data: Box<dyn ConnectionData>, host: UpstreamHost);

    fn on_pool_failure(&self, reason: PoolFailureReason, detail: &str, host: Option<UpstreamHost>);
}

/// A connection lent by the pool for the duration of one request.
///
/// Dropping it hands the connection back to the pool.
pub trait ConnectionData {
    fn connection(&self) -> Rc<dyn ClientConnection>;

    fn connection_state(&self) -> Option<ConnectionState>;

    fn set_connection_state(&self, state: ConnectionState);

    /// Register the receiver of bytes read from this connection.
    fn add_upstream_callbacks(&self, callbacks: Weak<dyn UpstreamCallbacks>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseType {
    /// Flush pending writes first.
    FlushWrite,
    NoFlush,
}

pub trait ClientConnection {
    /// Queue `data` for writing; the buffer is drained.
    fn write(&self, data: &mut BytesMut, end_stream: bool);

    fn close(&self, close_type: CloseType);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    RemoteClose,
    LocalClose,
}

/// Receiver of upstream connection activity.
pub trait UpstreamCallbacks {
    fn on_upstream_data(&self, data: &mut BytesMut, end_stream: bool);

    fn on_event(&self, event: ConnectionEvent);
}
