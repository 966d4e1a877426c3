// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::rc::Rc;

use bytes::BytesMut;

use crate::protocol::types::{FieldType, FilterStatus, MessageMetadata};

/// The sequence of events a Thrift message is made of.
///
/// The same operation set is used by the primary encoder, by the decoder to
/// report what it parsed, and by the shadow router handle. Mirroring a request
/// is therefore a matter of replaying the calls already made for the real
/// upstream.
///
/// Every callback defaults to [`FilterStatus::Continue`] so that handlers only
/// interested in a few events stay short.
#[allow(unused_variables)]
pub trait ProtocolEventHandler {
    fn transport_begin(&self, metadata: Option<&MessageMetadata>) -> FilterStatus {
        FilterStatus::Continue
    }

    fn transport_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Already-encoded message bytes to be forwarded verbatim.
    fn passthrough_data(&self, data: &mut BytesMut) -> FilterStatus {
        FilterStatus::Continue
    }

    fn message_begin(&self, metadata: Rc<MessageMetadata>) -> FilterStatus {
        FilterStatus::Continue
    }

    fn message_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    fn struct_begin(&self, name: &str) -> FilterStatus {
        FilterStatus::Continue
    }

    fn struct_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    fn field_begin(&self, name: &str, field_type: FieldType, field_id: i16) -> FilterStatus {
        FilterStatus::Continue
    }

    fn field_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    fn bool_value(&self, value: bool) -> FilterStatus {
        FilterStatus::Continue
    }

    fn byte_value(&self, value: u8) -> FilterStatus {
        FilterStatus::Continue
    }

    fn int16_value(&self, value: i16) -> FilterStatus {
        FilterStatus::Continue
    }

    fn int32_value(&self, value: i32) -> FilterStatus {
        FilterStatus::Continue
    }

    fn int64_value(&self, value: i64) -> FilterStatus {
        FilterStatus::Continue
    }

    fn double_value(&self, value: f64) -> FilterStatus {
        FilterStatus::Continue
    }

    fn string_value(&self, value: &[u8]) -> FilterStatus {
        FilterStatus::Continue
    }

    fn map_begin(&self, key_type: FieldType, value_type: FieldType, size: u32) -> FilterStatus {
        FilterStatus::Continue
    }

    fn map_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    fn list_begin(&self, elem_type: FieldType, size: u32) -> FilterStatus {
        FilterStatus::Continue
    }

    fn list_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }

    fn set_begin(&self, elem_type: FieldType, size: u32) -> FilterStatus {
        FilterStatus::Continue
    }

    fn set_end(&self) -> FilterStatus {
        FilterStatus::Continue
    }
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventHandler;

impl ProtocolEventHandler for NullEventHandler {}
