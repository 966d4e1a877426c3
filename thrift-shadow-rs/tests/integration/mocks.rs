// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Recording doubles for the cluster manager, pools and connections.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use bytes::BytesMut;
use thrift_shadow::protocol::MessageType;
use thrift_shadow::shadow::{ResponseClassifier, ResponseStatus};
use thrift_shadow::upstream::{
    CancelPolicy, Cancellable, ClientConnection, CloseType, ClusterManager, ConnectionData,
    ConnectionEvent, ConnectionPool, ConnectionState, PoolCallbacks, PoolFailureReason,
    ThreadLocalCluster, UpstreamCallbacks, UpstreamHost,
};
use thrift_shadow::ProtocolType;

pub const CLUSTER: &str = "shadow_cluster";

pub fn host() -> UpstreamHost {
    UpstreamHost::new(CLUSTER, SocketAddr::from(([127, 0, 0, 1], 9090)))
}

/// Connection that records what it is asked to do.
#[derive(Default)]
pub struct MockConnection {
    pub writes: RefCell<Vec<(Vec<u8>, bool)>>,
    pub closes: Cell<usize>,
}

impl MockConnection {
    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    pub fn written(&self, index: usize) -> Vec<u8> {
        self.writes.borrow()[index].0.clone()
    }
}

impl ClientConnection for MockConnection {
    fn write(&self, data: &mut BytesMut, end_stream: bool) {
        self.writes
            .borrow_mut()
            .push((data.split().to_vec(), end_stream));
    }

    fn close(&self, _close_type: CloseType) {
        self.closes.set(self.closes.get() + 1);
    }
}

/// Everything a test wants to observe about one pooled connection.
#[derive(Default)]
pub struct MockUpstream {
    pub connection: Rc<MockConnection>,
    pub state: RefCell<Option<ConnectionState>>,
    pub set_state_calls: Cell<usize>,
    pub connection_calls: Cell<usize>,
    pub callbacks: RefCell<Option<Weak<dyn UpstreamCallbacks>>>,
    pub released: Cell<usize>,
    read_buffer: RefCell<BytesMut>,
}

impl MockUpstream {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_state(state: ConnectionState) -> Rc<Self> {
        let upstream = Self::default();
        *upstream.state.borrow_mut() = Some(state);
        Rc::new(upstream)
    }

    fn callbacks(&self) -> Option<Rc<dyn UpstreamCallbacks>> {
        self.callbacks.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Deliver response bytes to the registered callbacks. Bytes left
    /// unconsumed are kept for the next delivery, like a socket read buffer.
    pub fn respond(&self, data: &[u8], end_stream: bool) {
        let mut buf = self.read_buffer.take();
        buf.extend_from_slice(data);
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_upstream_data(&mut buf, end_stream);
        }
        *self.read_buffer.borrow_mut() = buf;
    }

    pub fn raise(&self, event: ConnectionEvent) {
        let callbacks = self.callbacks();
        if let Some(callbacks) = callbacks {
            callbacks.on_event(event);
        }
    }

    pub fn conn_data(self: &Rc<Self>) -> Box<dyn ConnectionData> {
        Box::new(MockConnectionData {
            upstream: Rc::clone(self),
        })
    }
}

struct MockConnectionData {
    upstream: Rc<MockUpstream>,
}

impl ConnectionData for MockConnectionData {
    fn connection(&self) -> Rc<dyn ClientConnection> {
        let calls = &self.upstream.connection_calls;
        calls.set(calls.get() + 1);
        Rc::clone(&self.upstream.connection) as Rc<dyn ClientConnection>
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        self.upstream.state.borrow().clone()
    }

    fn set_connection_state(&self, state: ConnectionState) {
        let calls = &self.upstream.set_state_calls;
        calls.set(calls.get() + 1);
        *self.upstream.state.borrow_mut() = Some(state);
    }

    fn add_upstream_callbacks(&self, callbacks: Weak<dyn UpstreamCallbacks>) {
        *self.upstream.callbacks.borrow_mut() = Some(callbacks);
    }
}

impl Drop for MockConnectionData {
    fn drop(&mut self) {
        let released = &self.upstream.released;
        released.set(released.get() + 1);
    }
}

struct MockCancellable {
    cancels: Rc<Cell<usize>>,
}

impl Cancellable for MockCancellable {
    fn cancel(&mut self, _policy: CancelPolicy) {
        self.cancels.set(self.cancels.get() + 1);
    }
}

/// Pool that keeps requests pending until the test resolves them, or
/// resolves them inline when given an upstream up front.
#[derive(Default)]
pub struct MockPool {
    pub requests: Cell<usize>,
    pub cancels: Rc<Cell<usize>>,
    pending: RefCell<Option<Rc<dyn PoolCallbacks>>>,
    inline: RefCell<Option<Rc<MockUpstream>>>,
}

impl MockPool {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Make the next request complete synchronously on `upstream`.
    pub fn ready_inline(&self, upstream: &Rc<MockUpstream>) {
        *self.inline.borrow_mut() = Some(Rc::clone(upstream));
    }

    pub fn ready(&self, upstream: &Rc<MockUpstream>) {
        let callbacks = self.pending.borrow_mut().take();
        if let Some(callbacks) = callbacks {
            callbacks.on_pool_ready(upstream.conn_data(), host());
        }
    }

    pub fn fail(&self, reason: PoolFailureReason) {
        let callbacks = self.pending.borrow_mut().take();
        if let Some(callbacks) = callbacks {
            callbacks.on_pool_failure(reason, "connection refused", Some(host()));
        }
    }
}

impl ConnectionPool for MockPool {
    fn new_connection(&self, callbacks: Rc<dyn PoolCallbacks>) -> Option<Box<dyn Cancellable>> {
        self.requests.set(self.requests.get() + 1);

        let inline = self.inline.borrow_mut().take();
        if let Some(upstream) = inline {
            callbacks.on_pool_ready(upstream.conn_data(), host());
            return None;
        }

        *self.pending.borrow_mut() = Some(callbacks);
        Some(Box::new(MockCancellable {
            cancels: Rc::clone(&self.cancels),
        }))
    }
}

pub struct MockCluster {
    pub name: String,
    pub maintenance: Cell<bool>,
    pub pool: Option<Rc<MockPool>>,
    pub pool_lookups: Cell<usize>,
}

impl ThreadLocalCluster for MockCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn maintenance_mode(&self) -> bool {
        self.maintenance.get()
    }

    fn tcp_conn_pool(&self, _protocol: ProtocolType) -> Option<Rc<dyn ConnectionPool>> {
        self.pool_lookups.set(self.pool_lookups.get() + 1);
        self.pool
            .clone()
            .map(|pool| pool as Rc<dyn ConnectionPool>)
    }
}

#[derive(Default)]
pub struct MockClusterManager {
    pub clusters: HashMap<String, Rc<MockCluster>>,
    pub lookups: Cell<usize>,
}

impl MockClusterManager {
    pub fn with_cluster(maintenance: bool, pool: Option<Rc<MockPool>>) -> (Rc<Self>, Rc<MockCluster>) {
        let cluster = Rc::new(MockCluster {
            name: CLUSTER.to_string(),
            maintenance: Cell::new(maintenance),
            pool,
            pool_lookups: Cell::new(0),
        });
        let mut manager = Self::default();
        manager
            .clusters
            .insert(CLUSTER.to_string(), Rc::clone(&cluster));
        (Rc::new(manager), cluster)
    }
}

impl ClusterManager for MockClusterManager {
    fn get_thread_local_cluster(&self, name: &str) -> Option<Rc<dyn ThreadLocalCluster>> {
        self.lookups.set(self.lookups.get() + 1);
        self.clusters
            .get(name)
            .map(|cluster| Rc::clone(cluster) as Rc<dyn ThreadLocalCluster>)
    }
}

/// Classifier that plays back a fixed list of verdicts.
pub struct ScriptedClassifier {
    statuses: VecDeque<ResponseStatus>,
    message_type: MessageType,
    success: Option<bool>,
    pub calls: Rc<Cell<usize>>,
}

impl ScriptedClassifier {
    pub fn new(
        statuses: &[ResponseStatus],
        message_type: MessageType,
        success: Option<bool>,
        calls: Rc<Cell<usize>>,
    ) -> Self {
        Self {
            statuses: statuses.iter().copied().collect(),
            message_type,
            success,
            calls,
        }
    }
}

impl ResponseClassifier for ScriptedClassifier {
    fn upstream_data(&mut self, data: &mut BytesMut) -> ResponseStatus {
        self.calls.set(self.calls.get() + 1);
        let status = self.statuses.pop_front().unwrap_or(ResponseStatus::MoreData);
        if status == ResponseStatus::Complete {
            data.clear();
        }
        status
    }

    fn message_type(&self) -> Option<MessageType> {
        Some(self.message_type)
    }

    fn success(&self) -> Option<bool> {
        self.success
    }
}
