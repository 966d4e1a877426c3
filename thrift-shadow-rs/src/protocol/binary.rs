// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::error::DecodeError;
use crate::protocol::types::{FieldType, MessageMetadata, MessageType, ProtocolType};
use crate::protocol::Protocol;

const VERSION_MASK: u32 = 0xffff_0000;
const VERSION_1: u32 = 0x8001_0000;

/// Thrift binary protocol.
///
/// Writes the strict header (`0x8001` version word); reads both the strict
/// and the legacy non-strict header.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryProtocol;

impl BinaryProtocol {
    pub fn new() -> Self {
        Self
    }
}

fn peek_i32(buf: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(i32::from_be_bytes(bytes))
}

fn checked_len(what: &'static str, len: i32) -> Result<usize, DecodeError> {
    usize::try_from(len).map_err(|_| DecodeError::NegativeLength { what, len })
}

fn field_type(value: i8) -> Result<FieldType, DecodeError> {
    FieldType::from_i8(value).ok_or(DecodeError::UnknownFieldType(value))
}

/// Reads a length-prefixed string from the front of `buf` without consuming.
/// Returns the string bytes and the total number of bytes it occupies.
fn peek_string(buf: &[u8]) -> Result<Option<(&[u8], usize)>, DecodeError> {
    let Some(len) = peek_i32(buf) else {
        return Ok(None);
    };
    let len = checked_len("string", len)?;
    match buf.get(4..4 + len) {
        Some(bytes) => Ok(Some((bytes, 4 + len))),
        None => Ok(None),
    }
}

impl Protocol for BinaryProtocol {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Binary
    }

    fn write_message_begin(&self, buf: &mut BytesMut, metadata: &MessageMetadata) {
        buf.put_u32(VERSION_1 | metadata.message_type as u32);
        self.write_string(buf, metadata.method_name.as_bytes());
        buf.put_i32(metadata.sequence_id);
    }

    fn write_message_end(&self, _buf: &mut BytesMut) {}

    fn write_struct_begin(&self, _buf: &mut BytesMut, _name: &str) {}

    fn write_struct_end(&self, _buf: &mut BytesMut) {}

    fn write_field_begin(
        &self,
        buf: &mut BytesMut,
        _name: &str,
        field_type: FieldType,
        field_id: i16,
    ) {
        buf.put_i8(field_type as i8);
        if field_type != FieldType::Stop {
            buf.put_i16(field_id);
        }
    }

    fn write_field_end(&self, _buf: &mut BytesMut) {}

    fn write_map_begin(
        &self,
        buf: &mut BytesMut,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    ) {
        buf.put_i8(key_type as i8);
        buf.put_i8(value_type as i8);
        buf.put_u32(size);
    }

    fn write_map_end(&self, _buf: &mut BytesMut) {}

    fn write_list_begin(&self, buf: &mut BytesMut, elem_type: FieldType, size: u32) {
        buf.put_i8(elem_type as i8);
        buf.put_u32(size);
    }

    fn write_list_end(&self, _buf: &mut BytesMut) {}

    fn write_set_begin(&self, buf: &mut BytesMut, elem_type: FieldType, size: u32) {
        self.write_list_begin(buf, elem_type, size);
    }

    fn write_set_end(&self, _buf: &mut BytesMut) {}

    fn write_bool(&self, buf: &mut BytesMut, value: bool) {
        buf.put_u8(u8::from(value));
    }

    fn write_byte(&self, buf: &mut BytesMut, value: u8) {
        buf.put_u8(value);
    }

    fn write_i16(&self, buf: &mut BytesMut, value: i16) {
        buf.put_i16(value);
    }

    fn write_i32(&self, buf: &mut BytesMut, value: i32) {
        buf.put_i32(value);
    }

    fn write_i64(&self, buf: &mut BytesMut, value: i64) {
        buf.put_i64(value);
    }

    fn write_double(&self, buf: &mut BytesMut, value: f64) {
        buf.put_f64(value);
    }

    fn write_string(&self, buf: &mut BytesMut, value: &[u8]) {
        // Thrift strings are bounded by i32 on the wire.
        buf.put_u32(value.len() as u32);
        buf.put_slice(value);
    }

    fn read_message_begin(
        &self,
        buf: &mut &[u8],
    ) -> Result<Option<MessageMetadata>, DecodeError> {
        let Some(first) = peek_i32(buf) else {
            return Ok(None);
        };

        let (message_type, name, used) = if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(DecodeError::BadVersion(word));
            }
            let Some((name, name_len)) = peek_string(&buf[4..])? else {
                return Ok(None);
            };
            ((word & 0xff) as i8, name, 4 + name_len)
        } else {
            let Some((name, name_len)) = peek_string(buf)? else {
                return Ok(None);
            };
            let Some(&ty) = buf.get(name_len) else {
                return Ok(None);
            };
            (ty as i8, name, name_len + 1)
        };

        let Some(sequence_id) = buf.get(used..).and_then(peek_i32) else {
            return Ok(None);
        };
        let message_type =
            MessageType::from_i8(message_type).ok_or(DecodeError::UnknownMessageType(message_type))?;
        let metadata = MessageMetadata::new(
            &String::from_utf8_lossy(name),
            message_type,
            sequence_id,
        );

        buf.advance(used + 4);
        Ok(Some(metadata))
    }

    fn read_struct_begin(&self, _buf: &mut &[u8]) -> Result<Option<String>, DecodeError> {
        Ok(Some(String::new()))
    }

    fn read_field_begin(
        &self,
        buf: &mut &[u8],
    ) -> Result<Option<(FieldType, i16)>, DecodeError> {
        let Some(&ty) = buf.first() else {
            return Ok(None);
        };
        let ty = field_type(ty as i8)?;
        if ty == FieldType::Stop {
            buf.advance(1);
            return Ok(Some((ty, 0)));
        }
        if buf.len() < 3 {
            return Ok(None);
        }
        buf.advance(1);
        Ok(Some((ty, buf.get_i16())))
    }

    fn read_map_begin(
        &self,
        buf: &mut &[u8],
    ) -> Result<Option<(FieldType, FieldType, u32)>, DecodeError> {
        if buf.len() < 6 {
            return Ok(None);
        }
        let key_type = field_type(buf[0] as i8)?;
        let value_type = field_type(buf[1] as i8)?;
        let size = peek_i32(&buf[2..]).unwrap_or_default();
        let size = checked_len("map", size)? as u32;
        buf.advance(6);
        Ok(Some((key_type, value_type, size)))
    }

    fn read_list_begin(&self, buf: &mut &[u8]) -> Result<Option<(FieldType, u32)>, DecodeError> {
        if buf.len() < 5 {
            return Ok(None);
        }
        let elem_type = field_type(buf[0] as i8)?;
        let size = peek_i32(&buf[1..]).unwrap_or_default();
        let size = checked_len("list", size)? as u32;
        buf.advance(5);
        Ok(Some((elem_type, size)))
    }

    fn read_set_begin(&self, buf: &mut &[u8]) -> Result<Option<(FieldType, u32)>, DecodeError> {
        self.read_list_begin(buf)
    }

    fn read_bool(&self, buf: &mut &[u8]) -> Result<Option<bool>, DecodeError> {
        Ok(self.read_byte(buf)?.map(|b| b != 0))
    }

    fn read_byte(&self, buf: &mut &[u8]) -> Result<Option<u8>, DecodeError> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(buf.get_u8()))
    }

    fn read_i16(&self, buf: &mut &[u8]) -> Result<Option<i16>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        Ok(Some(buf.get_i16()))
    }

    fn read_i32(&self, buf: &mut &[u8]) -> Result<Option<i32>, DecodeError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        Ok(Some(buf.get_i32()))
    }

    fn read_i64(&self, buf: &mut &[u8]) -> Result<Option<i64>, DecodeError> {
        if buf.len() < 8 {
            return Ok(None);
        }
        Ok(Some(buf.get_i64()))
    }

    fn read_double(&self, buf: &mut &[u8]) -> Result<Option<f64>, DecodeError> {
        if buf.len() < 8 {
            return Ok(None);
        }
        Ok(Some(buf.get_f64()))
    }

    fn read_string(&self, buf: &mut &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        let Some((bytes, used)) = peek_string(buf)? else {
            return Ok(None);
        };
        let value = bytes.to_vec();
        buf.advance(used);
        Ok(Some(value))
    }
}
