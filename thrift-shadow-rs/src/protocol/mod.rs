// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Thrift wire codecs.
//!
//! A [`Transport`] deals with framing, a [`Protocol`] with the encoding of
//! the message inside a frame. Both are stateless; reads take a cursor over
//! the buffered bytes and only advance it when the element is complete, so a
//! short read (`Ok(None)`) can be retried once more bytes arrive.

pub mod binary;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod transport;
pub mod types;

use bytes::BytesMut;

pub use binary::BinaryProtocol;
pub use decoder::{DecodeStatus, Decoder};
pub use error::DecodeError;
pub use handler::{NullEventHandler, ProtocolEventHandler};
pub use transport::{FrameStart, FramedTransport, UnframedTransport};
pub use types::{
    FieldType, FilterStatus, MessageMetadata, MessageType, ProtocolType, TransportType,
};

/// Message framing.
pub trait Transport {
    fn transport_type(&self) -> TransportType;

    /// Append `message` to `out` wrapped in a frame. `message` is drained.
    fn encode_frame(&self, out: &mut BytesMut, message: &mut BytesMut);

    fn decode_frame_start(&self, buf: &mut &[u8]) -> Result<Option<FrameStart>, DecodeError>;

    fn decode_frame_end(&self, buf: &mut &[u8]) -> Result<(), DecodeError>;
}

/// Message encoding.
pub trait Protocol {
    fn protocol_type(&self) -> ProtocolType;

    fn write_message_begin(&self, buf: &mut BytesMut, metadata: &MessageMetadata);
    fn write_message_end(&self, buf: &mut BytesMut);
    fn write_struct_begin(&self, buf: &mut BytesMut, name: &str);
    fn write_struct_end(&self, buf: &mut BytesMut);
    fn write_field_begin(&self, buf: &mut BytesMut, name: &str, field_type: FieldType, field_id: i16);
    fn write_field_end(&self, buf: &mut BytesMut);
    fn write_map_begin(&self, buf: &mut BytesMut, key_type: FieldType, value_type: FieldType, size: u32);
    fn write_map_end(&self, buf: &mut BytesMut);
    fn write_list_begin(&self, buf: &mut BytesMut, elem_type: FieldType, size: u32);
    fn write_list_end(&self, buf: &mut BytesMut);
    fn write_set_begin(&self, buf: &mut BytesMut, elem_type: FieldType, size: u32);
    fn write_set_end(&self, buf: &mut BytesMut);
    fn write_bool(&self, buf: &mut BytesMut, value: bool);
    fn write_byte(&self, buf: &mut BytesMut, value: u8);
    fn write_i16(&self, buf: &mut BytesMut, value: i16);
    fn write_i32(&self, buf: &mut BytesMut, value: i32);
    fn write_i64(&self, buf: &mut BytesMut, value: i64);
    fn write_double(&self, buf: &mut BytesMut, value: f64);
    fn write_string(&self, buf: &mut BytesMut, value: &[u8]);

    fn read_message_begin(&self, buf: &mut &[u8]) -> Result<Option<MessageMetadata>, DecodeError>;
    fn read_struct_begin(&self, buf: &mut &[u8]) -> Result<Option<String>, DecodeError>;
    fn read_field_begin(&self, buf: &mut &[u8]) -> Result<Option<(FieldType, i16)>, DecodeError>;
    fn read_map_begin(
        &self,
        buf: &mut &[u8],
    ) -> Result<Option<(FieldType, FieldType, u32)>, DecodeError>;
    fn read_list_begin(&self, buf: &mut &[u8]) -> Result<Option<(FieldType, u32)>, DecodeError>;
    fn read_set_begin(&self, buf: &mut &[u8]) -> Result<Option<(FieldType, u32)>, DecodeError>;
    fn read_bool(&self, buf: &mut &[u8]) -> Result<Option<bool>, DecodeError>;
    fn read_byte(&self, buf: &mut &[u8]) -> Result<Option<u8>, DecodeError>;
    fn read_i16(&self, buf: &mut &[u8]) -> Result<Option<i16>, DecodeError>;
    fn read_i32(&self, buf: &mut &[u8]) -> Result<Option<i32>, DecodeError>;
    fn read_i64(&self, buf: &mut &[u8]) -> Result<Option<i64>, DecodeError>;
    fn read_double(&self, buf: &mut &[u8]) -> Result<Option<f64>, DecodeError>;
    fn read_string(&self, buf: &mut &[u8]) -> Result<Option<Vec<u8>>, DecodeError>;
}

/// Build a transport codec for `transport_type`.
pub fn create_transport(transport_type: TransportType) -> Box<dyn Transport> {
    match transport_type {
        TransportType::Framed => Box::new(FramedTransport),
        TransportType::Unframed => Box::new(UnframedTransport),
    }
}

/// Build a protocol codec for `protocol_type`.
pub fn create_protocol(protocol_type: ProtocolType) -> Box<dyn Protocol> {
    match protocol_type {
        ProtocolType::Binary => Box::new(BinaryProtocol::new()),
    }
}
