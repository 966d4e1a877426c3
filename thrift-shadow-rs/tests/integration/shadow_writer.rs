// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::Cell;
use std::rc::Rc;

use bytes::BytesMut;
use thrift_shadow::protocol::{
    create_protocol, create_transport, FieldType, FilterStatus, MessageMetadata, MessageType,
    ProtocolEventHandler, ProtocolType, TransportType,
};
use thrift_shadow::shadow::{
    ResponseClassifier, ResponseStatus, RouterState, ShadowStats, ShadowWriter, SkipReason,
    Submission,
};
use thrift_shadow::inspect_message;
use thrift_shadow::upstream::{
    ClusterManager, ConnectionEvent, PoolCallbacks, PoolFailureReason, ThriftConnectionState,
};

use crate::mocks::{
    host, MockCluster, MockClusterManager, MockPool, MockUpstream, ScriptedClassifier, CLUSTER,
};

struct Fixture {
    manager: Rc<MockClusterManager>,
    cluster: Rc<MockCluster>,
    pool: Rc<MockPool>,
    writer: ShadowWriter,
}

impl Fixture {
    fn new() -> Self {
        let pool = MockPool::new();
        let (manager, cluster) = MockClusterManager::with_cluster(false, Some(Rc::clone(&pool)));
        let writer = ShadowWriter::new(
            Rc::clone(&manager) as Rc<dyn ClusterManager>,
            ShadowStats::new("thrift").unwrap(),
        );
        Self {
            manager,
            cluster,
            pool,
            writer,
        }
    }

    /// Same fixture with responses judged by a scripted classifier.
    fn scripted(
        statuses: &'static [ResponseStatus],
        message_type: MessageType,
        success: Option<bool>,
    ) -> (Self, Rc<Cell<usize>>) {
        let mut fixture = Self::new();
        let calls = Rc::new(Cell::new(0));
        let factory_calls = Rc::clone(&calls);
        fixture.writer = ShadowWriter::new(
            Rc::clone(&fixture.manager) as Rc<dyn ClusterManager>,
            ShadowStats::new("thrift").unwrap(),
        )
        .with_classifier_factory(Box::new(move |_, _| {
            Box::new(ScriptedClassifier::new(
                statuses,
                message_type,
                success,
                Rc::clone(&factory_calls),
            )) as Box<dyn ResponseClassifier>
        }));
        (fixture, calls)
    }

    fn submit(&self, message_type: MessageType) -> Submission {
        self.writer.submit(
            CLUSTER,
            Rc::new(MessageMetadata::new("ping", message_type, 1)),
            TransportType::Framed,
            ProtocolType::Binary,
        )
    }

    fn counter(&self, name: &str) -> u64 {
        self.writer
            .stats()
            .counter(CLUSTER, &format!("thrift.{}", name))
    }
}

/// A request body that decodes cleanly.
fn replay_request(owner: &dyn ProtocolEventHandler) {
    owner.transport_begin(None);
    owner.message_begin(Rc::new(MessageMetadata::new("ping", MessageType::Call, 1)));
    owner.struct_begin("");
    owner.field_begin("", FieldType::I32, 1);
    owner.int32_value(42);
    owner.field_end();
    owner.field_begin("", FieldType::Stop, 0);
    owner.struct_end();
    owner.message_end();
    owner.transport_end();
}

/// Every operation of the request owner, in the order a decoder would
/// report them.
fn replay_every_event(owner: &dyn ProtocolEventHandler) {
    let mut passthrough = BytesMut::from(&b"hello"[..]);
    let events = [
        owner.transport_begin(None),
        owner.passthrough_data(&mut passthrough),
        owner.struct_begin(""),
        owner.field_begin("", FieldType::I32, 1),
        owner.field_end(),
        owner.struct_end(),
        owner.bool_value(true),
        owner.byte_value(2),
        owner.int16_value(3),
        owner.int32_value(4),
        owner.int64_value(5),
        owner.double_value(6.0),
        owner.string_value(b""),
        owner.map_begin(FieldType::I32, FieldType::I32, 2),
        owner.map_end(),
        owner.list_begin(FieldType::I32, 2),
        owner.list_end(),
        owner.set_begin(FieldType::I32, 2),
        owner.set_end(),
        owner.message_end(),
        owner.transport_end(),
    ];
    assert!(events.iter().all(|status| *status == FilterStatus::Continue));
}

fn framed_reply(message_type: MessageType, first_field: Option<i16>) -> Vec<u8> {
    let protocol = create_protocol(ProtocolType::Binary);
    let mut message = BytesMut::new();
    protocol.write_message_begin(&mut message, &MessageMetadata::new("ping", message_type, 0));
    protocol.write_struct_begin(&mut message, "");
    if let Some(id) = first_field {
        protocol.write_field_begin(&mut message, "", FieldType::String, id);
        protocol.write_string(&mut message, b"pong");
        protocol.write_field_end(&mut message);
    }
    protocol.write_field_begin(&mut message, "", FieldType::Stop, 0);
    protocol.write_struct_end(&mut message);
    protocol.write_message_end(&mut message);

    let mut frame = BytesMut::new();
    create_transport(TransportType::Framed).encode_frame(&mut frame, &mut message);
    frame.to_vec()
}

#[test]
fn test_submit_cluster_not_found() {
    let fixture = Fixture::new();
    let submission = fixture.writer.submit(
        "unknown",
        Rc::new(MessageMetadata::new("ping", MessageType::Call, 1)),
        TransportType::Framed,
        ProtocolType::Binary,
    );

    assert_eq!(submission.skip_reason(), Some(SkipReason::ClusterNotFound));
    assert_eq!(fixture.manager.lookups.get(), 1);
    assert_eq!(fixture.pool.requests.get(), 0);
    assert_eq!(fixture.writer.stats().total("unknown"), 0);
}

#[test]
fn test_submit_cluster_in_maintenance() {
    let fixture = Fixture::new();
    fixture.cluster.maintenance.set(true);

    let submission = fixture.submit(MessageType::Call);

    assert_eq!(submission.skip_reason(), Some(SkipReason::MaintenanceMode));
    assert_eq!(fixture.cluster.pool_lookups.get(), 0);
    assert_eq!(fixture.writer.stats().total(CLUSTER), 0);
}

#[test]
fn test_submit_no_healthy_upstream_still_counts_request() {
    let (manager, _cluster) = MockClusterManager::with_cluster(false, None);
    let writer = ShadowWriter::new(manager, ShadowStats::new("thrift").unwrap());

    let submission = writer.submit(
        CLUSTER,
        Rc::new(MessageMetadata::new("ping", MessageType::Oneway, 1)),
        TransportType::Framed,
        ProtocolType::Binary,
    );

    assert!(!submission.is_routed());
    assert_eq!(submission.skip_reason(), Some(SkipReason::NoHealthyUpstream));
    assert_eq!(writer.stats().counter(CLUSTER, "thrift.upstream_rq_oneway"), 1);
}

#[test]
fn test_submit_connection_not_ready() {
    let fixture = Fixture::new();

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();

    assert!(handle.waiting_for_connection());
    assert_eq!(fixture.pool.requests.get(), 1);
    assert_eq!(fixture.counter("upstream_rq_call"), 1);
    assert_eq!(fixture.writer.active_routers(), 1);

    let cancels = Rc::clone(&fixture.pool.cancels);
    drop(fixture);

    assert_eq!(cancels.get(), 1);
    assert_eq!(handle.state(), RouterState::Failed);
}

#[test]
fn test_shadow_request_pool_ready() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    assert!(!handle.waiting_for_connection());
    assert_eq!(handle.state(), RouterState::Connected);

    replay_every_event(handle.request_owner());

    let connection = Rc::clone(&upstream.connection);
    assert_eq!(connection.write_count(), 1);
    assert!(!connection.writes.borrow()[0].1);
    assert_eq!(upstream.set_state_calls.get(), 1);

    // Still waiting for the response when the writer goes away.
    drop(fixture);
    assert_eq!(connection.closes.get(), 1);
}

#[test]
fn test_written_frame_carries_request_header() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());

    let summary = inspect_message(
        &upstream.connection.written(0),
        TransportType::Framed,
        ProtocolType::Binary,
    )
    .unwrap()
    .unwrap();

    assert_eq!(summary.metadata.method_name, "ping");
    assert_eq!(summary.metadata.message_type, MessageType::Call);
    // First request on a fresh connection.
    assert_eq!(summary.metadata.sequence_id, 0);
}

#[test]
fn test_shadow_request_write_before_pool_ready() {
    let fixture = Fixture::new();
    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();

    replay_request(handle.request_owner());
    assert!(handle.waiting_for_connection());

    let upstream = MockUpstream::new();
    assert_eq!(upstream.connection.write_count(), 0);
    fixture.pool.ready(&upstream);

    assert_eq!(handle.state(), RouterState::Connected);
    assert_eq!(upstream.connection.write_count(), 1);
    assert_eq!(fixture.counter("upstream_rq_call"), 1);

    // Buffered events produce the same bytes as live ones.
    let live = Fixture::new();
    let live_upstream = MockUpstream::new();
    live.pool.ready_inline(&live_upstream);
    let live_handle = live.submit(MessageType::Call).into_handle().unwrap();
    replay_request(live_handle.request_owner());
    assert_eq!(upstream.connection.written(0), live_upstream.connection.written(0));

    let cancels = Rc::clone(&fixture.pool.cancels);
    drop(fixture);
    assert_eq!(upstream.connection.closes.get(), 1);
    // The pool already answered; there is nothing left to cancel.
    assert_eq!(cancels.get(), 0);
}

#[test]
fn test_shadow_request_pool_failure() {
    let fixture = Fixture::new();
    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();

    fixture.pool.fail(PoolFailureReason::RemoteConnectionFailure);

    assert_eq!(handle.state(), RouterState::Failed);
    assert_eq!(fixture.writer.active_routers(), 0);
    assert_eq!(handle.request_owner().message_end(), FilterStatus::Continue);
    assert_eq!(fixture.pool.cancels.get(), 0);

    // A late connection is released without being used.
    let upstream = MockUpstream::new();
    PoolCallbacks::on_pool_ready(handle.router().as_ref(), upstream.conn_data(), host());
    assert_eq!(upstream.connection_calls.get(), 0);
    assert_eq!(upstream.released.get(), 1);
}

#[test]
fn test_pool_failure_before_any_event() {
    let fixture = Fixture::new();
    let handle = fixture.submit(MessageType::Oneway).into_handle().unwrap();
    fixture.pool.fail(PoolFailureReason::Timeout);

    replay_request(handle.request_owner());

    assert_eq!(handle.state(), RouterState::Failed);
    assert_eq!(fixture.counter("upstream_rq_oneway"), 1);
    assert_eq!(fixture.writer.stats().total(CLUSTER), 1);
}

fn run_response_case(
    statuses: &'static [ResponseStatus],
    message_type: MessageType,
    success: Option<bool>,
) -> (Fixture, Rc<MockUpstream>, Rc<Cell<usize>>) {
    let (fixture, calls) = Fixture::scripted(statuses, message_type, success);
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());
    assert_eq!(upstream.connection.write_count(), 1);

    upstream.respond(b"part", false);
    upstream.respond(b"rest", false);
    (fixture, upstream, calls)
}

#[test]
fn test_on_upstream_data_reply_success() {
    let (fixture, upstream, calls) = run_response_case(
        &[ResponseStatus::MoreData, ResponseStatus::Complete],
        MessageType::Reply,
        Some(true),
    );

    assert_eq!(calls.get(), 2);
    assert_eq!(fixture.counter("upstream_resp_reply"), 1);
    assert_eq!(fixture.counter("upstream_resp_success"), 1);
    assert_eq!(fixture.counter("upstream_resp_error"), 0);
    assert_eq!(upstream.connection.closes.get(), 0);
    assert_eq!(upstream.released.get(), 1);
    assert_eq!(fixture.writer.active_routers(), 0);
}

#[test]
fn test_on_upstream_data_reply_error() {
    let (fixture, upstream, _) = run_response_case(
        &[ResponseStatus::MoreData, ResponseStatus::Complete],
        MessageType::Reply,
        Some(false),
    );

    assert_eq!(fixture.counter("upstream_resp_reply"), 1);
    assert_eq!(fixture.counter("upstream_resp_success"), 0);
    assert_eq!(fixture.counter("upstream_resp_error"), 1);
    assert_eq!(upstream.connection.closes.get(), 0);
}

#[test]
fn test_on_upstream_data_reply_exception() {
    let (fixture, upstream, _) = run_response_case(
        &[ResponseStatus::MoreData, ResponseStatus::Complete],
        MessageType::Exception,
        Some(false),
    );

    assert_eq!(fixture.counter("upstream_resp_exception"), 1);
    assert_eq!(fixture.counter("upstream_resp_reply"), 0);
    assert_eq!(upstream.connection.closes.get(), 0);
}

#[test]
fn test_on_upstream_data_decode_failure_resets() {
    let (fixture, upstream, _) = run_response_case(
        &[ResponseStatus::MoreData, ResponseStatus::Reset],
        MessageType::Reply,
        Some(true),
    );

    assert_eq!(upstream.connection.closes.get(), 1);
    for name in [
        "upstream_resp_reply",
        "upstream_resp_success",
        "upstream_resp_error",
        "upstream_resp_exception",
    ] {
        assert_eq!(fixture.counter(name), 0, "{}", name);
    }

    // Teardown does not close a second time.
    drop(fixture);
    assert_eq!(upstream.connection.closes.get(), 1);
}

#[test]
fn test_data_after_completion_is_ignored() {
    let (fixture, upstream, calls) = run_response_case(
        &[ResponseStatus::Complete],
        MessageType::Reply,
        Some(true),
    );

    assert_eq!(calls.get(), 1);
    upstream.respond(b"more", false);
    assert_eq!(calls.get(), 1);
    assert_eq!(fixture.counter("upstream_resp_reply"), 1);
}

#[test]
fn test_end_stream_before_complete_response() {
    let (fixture, calls) = Fixture::scripted(&[], MessageType::Reply, Some(true));
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());
    upstream.respond(b"partial", true);

    assert_eq!(calls.get(), 1);
    assert_eq!(handle.state(), RouterState::Failed);
    assert_eq!(fixture.counter("upstream_resp_reply"), 0);
    assert_eq!(upstream.connection.closes.get(), 0);
}

#[test]
fn test_remote_close_fails_request() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());
    upstream.raise(ConnectionEvent::RemoteClose);

    assert_eq!(handle.state(), RouterState::Failed);
    assert_eq!(fixture.writer.active_routers(), 0);
    assert_eq!(upstream.released.get(), 1);

    drop(fixture);
    assert_eq!(upstream.connection.closes.get(), 0);
}

#[test]
fn test_real_decoder_classifies_split_reply() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());

    let reply = framed_reply(MessageType::Reply, Some(0));
    upstream.respond(&reply[..6], false);
    assert_eq!(handle.state(), RouterState::Connected);
    upstream.respond(&reply[6..], false);

    assert_eq!(handle.state(), RouterState::Completed);
    assert_eq!(fixture.counter("upstream_resp_reply"), 1);
    assert_eq!(fixture.counter("upstream_resp_success"), 1);
}

#[test]
fn test_real_decoder_declared_exception() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());
    upstream.respond(&framed_reply(MessageType::Reply, Some(1)), false);

    assert_eq!(fixture.counter("upstream_resp_reply"), 1);
    assert_eq!(fixture.counter("upstream_resp_error"), 1);
}

#[test]
fn test_real_decoder_garbage_closes_connection() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());
    upstream.respond(&[0xff, 0xff, 0xff, 0xff, 0x00], false);

    assert_eq!(handle.state(), RouterState::Failed);
    assert_eq!(upstream.connection.closes.get(), 1);
    assert_eq!(fixture.writer.stats().total(CLUSTER), 1);
}

#[test]
fn test_oneway_completes_after_write() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Oneway).into_handle().unwrap();
    replay_request(handle.request_owner());

    assert_eq!(upstream.connection.write_count(), 1);
    assert_eq!(handle.state(), RouterState::Completed);
    assert_eq!(upstream.released.get(), 1);
    assert_eq!(fixture.counter("upstream_rq_oneway"), 1);
    assert_eq!(fixture.writer.stats().total(CLUSTER), 1);

    drop(fixture);
    assert_eq!(upstream.connection.closes.get(), 0);
}

#[test]
fn test_buffered_oneway_completes_on_pool_ready() {
    let fixture = Fixture::new();
    let handle = fixture.submit(MessageType::Oneway).into_handle().unwrap();
    replay_request(handle.request_owner());

    let upstream = MockUpstream::new();
    fixture.pool.ready(&upstream);

    assert_eq!(upstream.connection.write_count(), 1);
    assert_eq!(handle.state(), RouterState::Completed);
    assert_eq!(fixture.writer.active_routers(), 0);
}

#[test]
fn test_existing_connection_state_is_reused() {
    let fixture = Fixture::new();
    let state = Rc::new(ThriftConnectionState::new());
    for _ in 0..5 {
        state.next_sequence_id();
    }
    let upstream = MockUpstream::with_state(state);
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());

    assert_eq!(upstream.set_state_calls.get(), 0);
    let summary = inspect_message(
        &upstream.connection.written(0),
        TransportType::Framed,
        ProtocolType::Binary,
    )
    .unwrap()
    .unwrap();
    assert_eq!(summary.metadata.sequence_id, 5);
}

#[test]
fn test_duplicate_message_end_writes_once() {
    let fixture = Fixture::new();
    let upstream = MockUpstream::new();
    fixture.pool.ready_inline(&upstream);

    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    replay_request(handle.request_owner());
    handle.request_owner().message_end();

    assert_eq!(upstream.connection.write_count(), 1);
}

#[test]
fn test_inert_downstream_operations() {
    let fixture = Fixture::new();
    let handle = fixture.submit(MessageType::Call).into_handle().unwrap();
    let router = handle.router();

    router.on_above_write_buffer_high_watermark();
    router.on_below_write_buffer_low_watermark();
    router.reset_downstream_connection();

    assert!(router.downstream_connection().is_none());
    assert!(router.metadata_match_criteria().is_none());
    assert!(handle.waiting_for_connection());
}

#[test]
fn test_teardown_after_completion_is_a_no_op() {
    let (fixture, upstream, _) = run_response_case(
        &[ResponseStatus::Complete],
        MessageType::Reply,
        Some(true),
    );
    let cancels = Rc::clone(&fixture.pool.cancels);

    drop(fixture);

    assert_eq!(upstream.connection.closes.get(), 0);
    assert_eq!(cancels.get(), 0);
}
