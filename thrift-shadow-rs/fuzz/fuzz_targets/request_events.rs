// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
#![no_main]

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use thrift_shadow::protocol::{
    FieldType, MessageMetadata, MessageType, ProtocolEventHandler, ProtocolType, TransportType,
};
use thrift_shadow::shadow::{ShadowStats, ShadowWriter};
use thrift_shadow::upstream::{
    Cancellable, ClientConnection, CloseType, ClusterManager, ConnectionData, ConnectionPool,
    ConnectionState, PoolCallbacks, ThreadLocalCluster, UpstreamCallbacks, UpstreamHost,
};

#[derive(Arbitrary, Debug)]
enum Event {
    StructBegin,
    StructEnd,
    FieldBegin(i16),
    FieldEnd,
    Bool(bool),
    Byte(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    Str(Vec<u8>),
    ListBegin(u32),
    ListEnd,
    MapBegin(u32),
    MapEnd,
    MessageEnd,
    PoolReady,
    Response(Vec<u8>, bool),
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    oneway: bool,
    events: Vec<Event>,
}

#[derive(Default)]
struct Sink {
    writes: Cell<usize>,
    closes: Cell<usize>,
}

impl ClientConnection for Sink {
    fn write(&self, data: &mut BytesMut, _end_stream: bool) {
        data.clear();
        self.writes.set(self.writes.get() + 1);
    }

    fn close(&self, _close_type: CloseType) {
        self.closes.set(self.closes.get() + 1);
    }
}

struct Conn {
    sink: Rc<Sink>,
    callbacks: Rc<RefCell<Option<Weak<dyn UpstreamCallbacks>>>>,
}

impl ConnectionData for Conn {
    fn connection(&self) -> Rc<dyn ClientConnection> {
        self.sink.clone()
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        None
    }

    fn set_connection_state(&self, _state: ConnectionState) {}

    fn add_upstream_callbacks(&self, callbacks: Weak<dyn UpstreamCallbacks>) {
        *self.callbacks.borrow_mut() = Some(callbacks);
    }
}

struct NoopCancel;

impl Cancellable for NoopCancel {
    fn cancel(&mut self, _policy: thrift_shadow::upstream::CancelPolicy) {}
}

#[derive(Default)]
struct Pool {
    pending: RefCell<Option<Rc<dyn PoolCallbacks>>>,
}

impl ConnectionPool for Pool {
    fn new_connection(&self, callbacks: Rc<dyn PoolCallbacks>) -> Option<Box<dyn Cancellable>> {
        *self.pending.borrow_mut() = Some(callbacks);
        Some(Box::new(NoopCancel))
    }
}

struct Cluster {
    pool: Rc<Pool>,
}

impl ThreadLocalCluster for Cluster {
    fn name(&self) -> &str {
        "fuzz"
    }

    fn maintenance_mode(&self) -> bool {
        false
    }

    fn tcp_conn_pool(&self, _protocol: ProtocolType) -> Option<Rc<dyn ConnectionPool>> {
        Some(self.pool.clone() as Rc<dyn ConnectionPool>)
    }
}

struct Manager {
    cluster: Rc<Cluster>,
}

impl ClusterManager for Manager {
    fn get_thread_local_cluster(&self, _name: &str) -> Option<Rc<dyn ThreadLocalCluster>> {
        Some(self.cluster.clone() as Rc<dyn ThreadLocalCluster>)
    }
}

fuzz_target!(|input: FuzzInput| {
    let pool = Rc::new(Pool::default());
    let manager = Rc::new(Manager {
        cluster: Rc::new(Cluster { pool: pool.clone() }),
    });
    let writer = ShadowWriter::new(manager, ShadowStats::new("thrift").expect("fresh registry"));

    let message_type = if input.oneway {
        MessageType::Oneway
    } else {
        MessageType::Call
    };
    let Some(handle) = writer
        .submit(
            "fuzz",
            Rc::new(MessageMetadata::new("fuzz", message_type, 0)),
            TransportType::Framed,
            ProtocolType::Binary,
        )
        .into_handle()
    else {
        return;
    };

    let sink = Rc::new(Sink::default());
    let callbacks = Rc::new(RefCell::new(None::<Weak<dyn UpstreamCallbacks>>));
    let owner = handle.request_owner();

    for event in input.events {
        match event {
            Event::StructBegin => {
                let _ = owner.struct_begin("");
            }
            Event::StructEnd => {
                let _ = owner.struct_end();
            }
            Event::FieldBegin(id) => {
                let _ = owner.field_begin("", FieldType::I32, id);
            }
            Event::FieldEnd => {
                let _ = owner.field_end();
            }
            Event::Bool(v) => {
                let _ = owner.bool_value(v);
            }
            Event::Byte(v) => {
                let _ = owner.byte_value(v);
            }
            Event::I16(v) => {
                let _ = owner.int16_value(v);
            }
            Event::I32(v) => {
                let _ = owner.int32_value(v);
            }
            Event::I64(v) => {
                let _ = owner.int64_value(v);
            }
            Event::Double(v) => {
                let _ = owner.double_value(v);
            }
            Event::Str(v) => {
                let _ = owner.string_value(&v);
            }
            Event::ListBegin(n) => {
                let _ = owner.list_begin(FieldType::I32, n);
            }
            Event::ListEnd => {
                let _ = owner.list_end();
            }
            Event::MapBegin(n) => {
                let _ = owner.map_begin(FieldType::I32, FieldType::I32, n);
            }
            Event::MapEnd => {
                let _ = owner.map_end();
            }
            Event::MessageEnd => {
                let _ = owner.message_end();
            }
            Event::PoolReady => {
                let pending = pool.pending.borrow_mut().take();
                if let Some(pending) = pending {
                    let conn = Box::new(Conn {
                        sink: sink.clone(),
                        callbacks: callbacks.clone(),
                    });
                    let host = UpstreamHost::new("fuzz", SocketAddr::from(([127, 0, 0, 1], 1)));
                    pending.on_pool_ready(conn, host);
                }
            }
            Event::Response(bytes, end_stream) => {
                let target = callbacks.borrow().as_ref().and_then(Weak::upgrade);
                if let Some(target) = target {
                    target.on_upstream_data(&mut BytesMut::from(&bytes[..]), end_stream);
                }
            }
        }
        // The request is written at most once and closed at most once
        assert!(sink.writes.get() <= 1);
        assert!(sink.closes.get() <= 1);
    }

    drop(writer);
    assert!(sink.closes.get() <= 1);
});
