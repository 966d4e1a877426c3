// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;
use thrift_shadow::protocol::{
    create_protocol, create_transport, DecodeError, DecodeStatus, Decoder, FieldType,
    FilterStatus, MessageMetadata, MessageType, Protocol, ProtocolEventHandler, ProtocolType,
    TransportType,
};
use thrift_shadow::inspect_message;

#[derive(Default)]
struct MethodLog {
    methods: RefCell<Vec<(String, i32)>>,
    containers: RefCell<Vec<u32>>,
}

impl ProtocolEventHandler for MethodLog {
    fn message_begin(&self, metadata: Rc<MessageMetadata>) -> FilterStatus {
        self.methods
            .borrow_mut()
            .push((metadata.method_name.clone(), metadata.sequence_id));
        FilterStatus::Continue
    }

    fn map_begin(&self, _key: FieldType, _value: FieldType, size: u32) -> FilterStatus {
        self.containers.borrow_mut().push(size);
        FilterStatus::Continue
    }

    fn set_begin(&self, _elem: FieldType, size: u32) -> FilterStatus {
        self.containers.borrow_mut().push(size);
        FilterStatus::Continue
    }
}

/// A call whose single argument is a map<i32, set<string>>.
fn nested_call(protocol: &dyn Protocol, method: &str, sequence_id: i32) -> BytesMut {
    let mut message = BytesMut::new();
    protocol.write_message_begin(
        &mut message,
        &MessageMetadata::new(method, MessageType::Call, sequence_id),
    );
    protocol.write_struct_begin(&mut message, "");
    protocol.write_field_begin(&mut message, "", FieldType::Map, 1);
    protocol.write_map_begin(&mut message, FieldType::I32, FieldType::Set, 1);
    protocol.write_i32(&mut message, 10);
    protocol.write_set_begin(&mut message, FieldType::String, 2);
    protocol.write_string(&mut message, b"a");
    protocol.write_string(&mut message, b"b");
    protocol.write_set_end(&mut message);
    protocol.write_map_end(&mut message);
    protocol.write_field_end(&mut message);
    protocol.write_field_begin(&mut message, "", FieldType::Stop, 0);
    protocol.write_struct_end(&mut message);
    protocol.write_message_end(&mut message);
    message
}

#[test]
fn test_pipelined_framed_messages() {
    let protocol = create_protocol(ProtocolType::Binary);
    let transport = create_transport(TransportType::Framed);
    let mut buf = BytesMut::new();
    transport.encode_frame(&mut buf, &mut nested_call(protocol.as_ref(), "first", 1));
    transport.encode_frame(&mut buf, &mut nested_call(protocol.as_ref(), "second", 2));

    let decoder = Decoder::new(
        create_transport(TransportType::Framed),
        create_protocol(ProtocolType::Binary),
    );
    let log = MethodLog::default();

    assert_eq!(decoder.on_data(&mut buf, &log), Ok(DecodeStatus::Complete));
    assert_eq!(decoder.on_data(&mut buf, &log), Ok(DecodeStatus::Complete));
    assert_eq!(decoder.on_data(&mut buf, &log), Ok(DecodeStatus::NeedMoreData));

    assert!(buf.is_empty());
    assert_eq!(
        *log.methods.borrow(),
        vec![("first".to_string(), 1), ("second".to_string(), 2)]
    );
    assert_eq!(*log.containers.borrow(), vec![1, 2, 1, 2]);
}

#[test]
fn test_unframed_message_fed_byte_by_byte() {
    let protocol = create_protocol(ProtocolType::Binary);
    let message = nested_call(protocol.as_ref(), "slow", 9);

    let decoder = Decoder::new(
        create_transport(TransportType::Unframed),
        create_protocol(ProtocolType::Binary),
    );
    let log = MethodLog::default();
    let mut buf = BytesMut::new();

    for (i, byte) in message.iter().enumerate() {
        buf.extend_from_slice(&[*byte]);
        let status = decoder.on_data(&mut buf, &log).unwrap();
        if i + 1 < message.len() {
            assert_eq!(status, DecodeStatus::NeedMoreData);
        } else {
            assert_eq!(status, DecodeStatus::Complete);
        }
    }
    assert_eq!(*log.methods.borrow(), vec![("slow".to_string(), 9)]);
}

#[test]
fn test_inspect_unframed_exception() {
    let protocol = create_protocol(ProtocolType::Binary);
    let mut message = BytesMut::new();
    protocol.write_message_begin(
        &mut message,
        &MessageMetadata::new("fail", MessageType::Exception, 4),
    );
    protocol.write_struct_begin(&mut message, "TApplicationException");
    protocol.write_field_begin(&mut message, "message", FieldType::String, 1);
    protocol.write_string(&mut message, b"boom");
    protocol.write_field_end(&mut message);
    protocol.write_field_begin(&mut message, "type", FieldType::I32, 2);
    protocol.write_i32(&mut message, 6);
    protocol.write_field_end(&mut message);
    protocol.write_field_begin(&mut message, "", FieldType::Stop, 0);
    protocol.write_struct_end(&mut message);
    protocol.write_message_end(&mut message);

    let summary = inspect_message(&message, TransportType::Unframed, ProtocolType::Binary)
        .unwrap()
        .unwrap();

    assert_eq!(summary.metadata.message_type, MessageType::Exception);
    assert_eq!(summary.success, Some(false));
}

#[test]
fn test_oversized_frame_is_rejected_before_buffering() {
    let mut buf = BytesMut::from(&[0x7f, 0xff, 0xff, 0xff][..]);
    let decoder = Decoder::new(
        create_transport(TransportType::Framed),
        create_protocol(ProtocolType::Binary),
    );

    let result = decoder.on_data(&mut buf, &MethodLog::default());
    assert!(matches!(result, Err(DecodeError::FrameTooLarge { .. })));
}
