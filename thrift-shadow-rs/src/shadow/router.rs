// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::BytesMut;

use crate::protocol::{
    create_protocol, create_transport, FieldType, FilterStatus, MessageMetadata, Protocol,
    ProtocolEventHandler, ProtocolType, TransportType,
};
use crate::shadow::classifier::{ResponseClassifier, ResponseStatus};
use crate::shadow::sink::{EventSink, PendingWrite};
use crate::shadow::stats::ShadowStats;
use crate::shadow::writer::ActiveRouters;
use crate::upstream::{
    CancelPolicy, Cancellable, ClientConnection, CloseType, ConnectionData, ConnectionEvent,
    ConnectionPool, PoolCallbacks, PoolFailureReason, ThriftConnectionState, UpstreamCallbacks,
    UpstreamHost,
};

/// Route metadata a shadow request could be matched on. Always empty.
pub type MetadataMatchCriteria = BTreeMap<String, String>;

/// Lifecycle of a shadow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    AwaitingConnection,
    Connected,
    Completed,
    Failed,
}

impl RouterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingConnection => "awaiting_connection",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct UpstreamConnection {
    // Dropping the connection data hands the connection back to its pool.
    _conn_data: Box<dyn ConnectionData>,
    connection: Rc<dyn ClientConnection>,
    host: UpstreamHost,
}

struct RouterInner {
    state: RouterState,
    sink: Option<EventSink>,
    cancellable: Option<Box<dyn Cancellable>>,
    upstream: Option<UpstreamConnection>,
    classifier: Box<dyn ResponseClassifier>,
    request_complete: bool,
}

/// Mirrors one request onto a shadow cluster.
///
/// The router buffers protocol events until its pool hands it a connection,
/// then writes the whole message and waits for the response, which is
/// classified for statistics and otherwise thrown away. Nothing that happens
/// here is reported back to the caller: every event returns
/// [`FilterStatus::Continue`].
///
/// No method keeps the router state borrowed while calling into the pool, a
/// connection or the owning writer, so those may call back synchronously.
pub struct ShadowRouter {
    id: u64,
    cluster_name: String,
    metadata: Rc<MessageMetadata>,
    transport_type: TransportType,
    stats: ShadowStats,
    parent: Weak<ActiveRouters>,
    this: Weak<ShadowRouter>,
    inner: RefCell<RouterInner>,
}

impl ShadowRouter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        cluster_name: &str,
        metadata: Rc<MessageMetadata>,
        transport_type: TransportType,
        protocol_type: ProtocolType,
        stats: ShadowStats,
        classifier: Box<dyn ResponseClassifier>,
        parent: Weak<ActiveRouters>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id,
            cluster_name: cluster_name.to_string(),
            metadata,
            transport_type,
            stats,
            parent,
            this: this.clone(),
            inner: RefCell::new(RouterInner {
                state: RouterState::AwaitingConnection,
                sink: Some(EventSink::buffering(create_protocol(protocol_type))),
                cancellable: None,
                upstream: None,
                classifier,
                request_complete: false,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn metadata(&self) -> &Rc<MessageMetadata> {
        &self.metadata
    }

    pub fn state(&self) -> RouterState {
        self.inner.borrow().state
    }

    pub fn waiting_for_connection(&self) -> bool {
        self.state() == RouterState::AwaitingConnection
    }

    pub fn upstream_host(&self) -> Option<UpstreamHost> {
        self.inner
            .borrow()
            .upstream
            .as_ref()
            .map(|upstream| upstream.host.clone())
    }

    /// Request a connection from `pool`, with this router as the callback
    /// target.
    pub(crate) fn start(self: &Rc<Self>, pool: Rc<dyn ConnectionPool>) {
        let callbacks: Rc<dyn PoolCallbacks> = Rc::clone(self) as Rc<dyn PoolCallbacks>;
        let cancellable = pool.new_connection(callbacks);

        let mut inner = self.inner.borrow_mut();
        match cancellable {
            Some(handle) if inner.state == RouterState::AwaitingConnection => {
                tracing::trace!(router = self.id, "waiting for shadow connection");
                inner.cancellable = Some(handle);
            }
            // The pool already answered.
            _ => {}
        }
    }

    /// Tear the router down because its writer is going away.
    ///
    /// Cancels a pending connection request or closes an open connection.
    pub(crate) fn on_writer_teardown(&self) {
        if !self.state().is_terminal() {
            tracing::debug!(
                router = self.id,
                cluster = %self.cluster_name,
                state = %self.state(),
                "shadow writer destroyed with request in flight"
            );
        }
        self.finish(RouterState::Failed, true);
    }

    // Inert downstream hooks: a shadow request has no downstream peer.

    pub fn on_above_write_buffer_high_watermark(&self) {}

    pub fn on_below_write_buffer_low_watermark(&self) {}

    pub fn downstream_connection(&self) -> Option<Rc<dyn ClientConnection>> {
        None
    }

    pub fn metadata_match_criteria(&self) -> Option<&MetadataMatchCriteria> {
        None
    }

    pub fn reset_downstream_connection(&self) {}

    fn encode(&self, write: impl FnOnce(&dyn Protocol, &mut BytesMut)) -> FilterStatus {
        let mut inner = self.inner.borrow_mut();
        if !inner.request_complete {
            if let Some(sink) = inner.sink.as_mut() {
                sink.encode(write);
            }
        }
        FilterStatus::Continue
    }

    fn send(&self, pending: PendingWrite) {
        tracing::trace!(
            router = self.id,
            cluster = %self.cluster_name,
            bytes = pending.frame_len(),
            "writing shadow request"
        );
        pending.send();
    }

    fn complete_oneway(&self) {
        let ready = {
            let inner = self.inner.borrow();
            inner.state == RouterState::Connected && inner.request_complete
        };
        if ready && self.metadata.is_oneway() {
            self.finish(RouterState::Completed, false);
        }
    }

    /// Enter a terminal state and release every resource. Runs at most once.
    fn finish(&self, terminal: RouterState, close: bool) {
        let (upstream, cancellable) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = terminal;
            inner.sink = None;
            (inner.upstream.take(), inner.cancellable.take())
        };

        if let Some(mut cancellable) = cancellable {
            cancellable.cancel(CancelPolicy::Default);
        }
        if let Some(upstream) = upstream {
            if close {
                upstream.connection.close(CloseType::NoFlush);
            }
        }

        tracing::debug!(
            router = self.id,
            cluster = %self.cluster_name,
            method = %self.metadata.method_name,
            state = %terminal,
            "shadow request finished"
        );

        if let Some(parent) = self.parent.upgrade() {
            parent.remove(self.id);
        }
    }
}

fn bind_connection_state(conn_data: &dyn ConnectionData) -> Rc<ThriftConnectionState> {
    if let Some(state) = conn_data
        .connection_state()
        .and_then(|state| state.downcast::<ThriftConnectionState>().ok())
    {
        return state;
    }

    let state = Rc::new(ThriftConnectionState::new());
    conn_data.set_connection_state(Rc::clone(&state) as Rc<dyn std::any::Any>);
    state
}

impl PoolCallbacks for ShadowRouter {
    fn on_pool_ready(&self, conn_data: Box<dyn ConnectionData>, host: UpstreamHost) {
        if self.state() != RouterState::AwaitingConnection {
            tracing::debug!(
                router = self.id,
                state = %self.state(),
                "releasing shadow connection that arrived late"
            );
            return;
        }

        let conn_state = bind_connection_state(conn_data.as_ref());
        let metadata = self
            .metadata
            .with_sequence_id(conn_state.next_sequence_id());
        let connection = conn_data.connection();
        let callbacks: Weak<dyn UpstreamCallbacks> = self.this.clone();
        conn_data.add_upstream_callbacks(callbacks);

        let pending = {
            let mut inner = self.inner.borrow_mut();
            inner.cancellable = None;

            let pending = match inner.sink.take() {
                Some(EventSink::Buffering(buffering)) => {
                    tracing::debug!(
                        router = self.id,
                        cluster = %self.cluster_name,
                        host = %host.address,
                        buffered_events = buffering.buffered_events(),
                        buffered_bytes = buffering.buffered_bytes(),
                        "shadow connection ready"
                    );
                    let (live, pending) = buffering.into_live(
                        create_transport(self.transport_type),
                        Rc::clone(&connection),
                        &metadata,
                    );
                    inner.sink = Some(EventSink::Live(live));
                    pending
                }
                other => {
                    inner.sink = other;
                    None
                }
            };

            inner.upstream = Some(UpstreamConnection {
                _conn_data: conn_data,
                connection,
                host,
            });
            inner.state = RouterState::Connected;
            pending
        };

        if let Some(pending) = pending {
            self.send(pending);
        }
        self.complete_oneway();
    }

    fn on_pool_failure(&self, reason: PoolFailureReason, detail: &str, host: Option<UpstreamHost>) {
        tracing::debug!(
            router = self.id,
            cluster = %self.cluster_name,
            reason = %reason,
            detail = %detail,
            host = ?host.map(|h| h.address),
            "shadow connection failed"
        );

        // The pool is done with this request; its handle must not be used.
        self.inner.borrow_mut().cancellable = None;
        self.finish(RouterState::Failed, false);
    }
}

impl UpstreamCallbacks for ShadowRouter {
    fn on_upstream_data(&self, data: &mut BytesMut, end_stream: bool) {
        let status = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != RouterState::Connected {
                tracing::trace!(
                    router = self.id,
                    state = %inner.state,
                    bytes = data.len(),
                    "ignoring shadow response data"
                );
                return;
            }
            inner.classifier.upstream_data(data)
        };

        match status {
            ResponseStatus::MoreData => {
                if end_stream {
                    tracing::debug!(
                        router = self.id,
                        cluster = %self.cluster_name,
                        "shadow connection ended before the response completed"
                    );
                    self.finish(RouterState::Failed, false);
                }
            }
            ResponseStatus::Complete => {
                let (message_type, success) = {
                    let inner = self.inner.borrow();
                    (inner.classifier.message_type(), inner.classifier.success())
                };
                match message_type {
                    Some(message_type) => self.stats.inc_response(
                        &self.cluster_name,
                        message_type,
                        success.unwrap_or(false),
                    ),
                    None => tracing::warn!(
                        router = self.id,
                        cluster = %self.cluster_name,
                        "shadow response completed without a message header"
                    ),
                }
                self.finish(RouterState::Completed, false);
            }
            ResponseStatus::Reset => {
                tracing::debug!(
                    router = self.id,
                    cluster = %self.cluster_name,
                    "invalid shadow response, closing connection"
                );
                self.finish(RouterState::Failed, true);
            }
        }
    }

    fn on_event(&self, event: ConnectionEvent) {
        if self.state().is_terminal() {
            return;
        }
        tracing::debug!(
            router = self.id,
            cluster = %self.cluster_name,
            event = ?event,
            "shadow connection closed"
        );
        // The connection is gone; there is nothing left to close.
        let upstream = self.inner.borrow_mut().upstream.take();
        drop(upstream);
        self.finish(RouterState::Failed, false);
    }
}

impl ProtocolEventHandler for ShadowRouter {
    fn transport_begin(&self, _metadata: Option<&MessageMetadata>) -> FilterStatus {
        FilterStatus::Continue
    }

    fn transport_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    fn passthrough_data(&self, data: &mut BytesMut) -> FilterStatus {
        self.encode(|_, buf| buf.extend_from_slice(data))
    }

    /// The header is written from the submitted metadata once the
    /// connection is known.
    fn message_begin(&self, _metadata: Rc<MessageMetadata>) -> FilterStatus {
        FilterStatus::Continue
    }

    fn message_end(&self) -> FilterStatus {
        let pending = {
            let mut inner = self.inner.borrow_mut();
            if inner.request_complete {
                return FilterStatus::Continue;
            }
            inner.request_complete = true;
            inner.sink.as_mut().and_then(EventSink::message_end)
        };

        if let Some(pending) = pending {
            self.send(pending);
        }
        self.complete_oneway();
        FilterStatus::Continue
    }

    fn struct_begin(&self, name: &str) -> FilterStatus {
        self.encode(|p, buf| p.write_struct_begin(buf, name))
    }

    fn struct_end(&self) -> FilterStatus {
        self.encode(|p, buf| p.write_struct_end(buf))
    }

    fn field_begin(&self, name: &str, field_type: FieldType, field_id: i16) -> FilterStatus {
        self.encode(|p, buf| p.write_field_begin(buf, name, field_type, field_id))
    }

    fn field_end(&self) -> FilterStatus {
        self.encode(|p, buf| p.write_field_end(buf))
    }

    fn bool_value(&self, value: bool) -> FilterStatus {
        self.encode(|p, buf| p.write_bool(buf, value))
    }

    fn byte_value(&self, value: u8) -> FilterStatus {
        self.encode(|p, buf| p.write_byte(buf, value))
    }

    fn int16_value(&self, value: i16) -> FilterStatus {
        self.encode(|p, buf| p.write_i16(buf, value))
    }

    fn int32_value(&self, value: i32) -> FilterStatus {
        self.encode(|p, buf| p.write_i32(buf, value))
    }

    fn int64_value(&self, value: i64) -> FilterStatus {
        self.encode(|p, buf| p.write_i64(buf, value))
    }

    fn double_value(&self, value: f64) -> FilterStatus {
        self.encode(|p, buf| p.write_double(buf, value))
    }

    fn string_value(&self, value: &[u8]) -> FilterStatus {
        self.encode(|p, buf| p.write_string(buf, value))
    }

    fn map_begin(&self, key_type: FieldType, value_type: FieldType, size: u32) -> FilterStatus {
        self.encode(|p, buf| p.write_map_begin(buf, key_type, value_type, size))
    }

    fn map_end(&self) -> FilterStatus {
        self.encode(|p, buf| p.write_map_end(buf))
    }

    fn list_begin(&self, elem_type: FieldType, size: u32) -> FilterStatus {
        self.encode(|p, buf| p.write_list_begin(buf, elem_type, size))
    }

    fn list_end(&self) -> FilterStatus {
        self.encode(|p, buf| p.write_list_end(buf))
    }

    fn set_begin(&self, elem_type: FieldType, size: u32) -> FilterStatus {
        self.encode(|p, buf| p.write_set_begin(buf, elem_type, size))
    }

    fn set_end(&self) -> FilterStatus {
        self.encode(|p, buf| p.write_set_end(buf))
    }
}
