// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::rc::Rc;

use bytes::{Buf, BytesMut};

use crate::protocol::error::DecodeError;
use crate::protocol::handler::{NullEventHandler, ProtocolEventHandler};
use crate::protocol::types::{FieldType, FilterStatus};
use crate::protocol::{Protocol, Transport};

/// Deepest struct/container nesting accepted in a message.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Outcome of a [`Decoder::on_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// No complete message at the front of the buffer; nothing consumed.
    NeedMoreData,
    /// One message was decoded, reported and consumed.
    Complete,
}

/// Result of walking (part of) a message: `Ok(None)` means the buffer ran
/// out before the element ended.
type Walk = Result<Option<()>, DecodeError>;

macro_rules! need {
    ($read:expr) => {
        match $read? {
            Some(value) => value,
            None => return Ok(None),
        }
    };
}

macro_rules! emit {
    ($event:expr) => {
        if $event == FilterStatus::StopIteration {
            return Err(DecodeError::Stopped);
        }
    };
}

/// Drives a transport and a protocol codec over a byte buffer and reports
/// each decoded message to a [`ProtocolEventHandler`].
///
/// A message is walked twice: once silently to make sure it is complete and
/// well formed, then again with the caller's handler. Handlers therefore never
/// observe a partial or malformed message.
pub struct Decoder {
    transport: Box<dyn Transport>,
    protocol: Box<dyn Protocol>,
}

impl Decoder {
    pub fn new(transport: Box<dyn Transport>, protocol: Box<dyn Protocol>) -> Self {
        Self {
            transport,
            protocol,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn protocol(&self) -> &dyn Protocol {
        self.protocol.as_ref()
    }

    /// Decode at most one message from the front of `buf`.
    ///
    /// Bytes are consumed only when a whole message was decoded. A handler
    /// returning [`FilterStatus::StopIteration`] suppresses the remaining
    /// events of that message; the message is still consumed.
    pub fn on_data(
        &self,
        buf: &mut BytesMut,
        handler: &dyn ProtocolEventHandler,
    ) -> Result<DecodeStatus, DecodeError> {
        let consumed = {
            let mut cursor: &[u8] = &buf[..];
            let Some(frame) = self.transport.decode_frame_start(&mut cursor)? else {
                return Ok(DecodeStatus::NeedMoreData);
            };
            let header_len = buf.len() - cursor.len();

            let message_len = match frame.size {
                Some(declared) => {
                    if cursor.len() < declared {
                        return Ok(DecodeStatus::NeedMoreData);
                    }
                    let mut scan = &cursor[..declared];
                    if self.walk_message(&mut scan, &NullEventHandler)?.is_none() {
                        return Err(DecodeError::TruncatedFrame { declared });
                    }
                    if !scan.is_empty() {
                        return Err(DecodeError::FrameSizeMismatch {
                            declared,
                            used: declared - scan.len(),
                        });
                    }
                    declared
                }
                None => {
                    let mut scan = cursor;
                    if self.walk_message(&mut scan, &NullEventHandler)?.is_none() {
                        return Ok(DecodeStatus::NeedMoreData);
                    }
                    cursor.len() - scan.len()
                }
            };

            let mut message = &cursor[..message_len];
            match self.report(&mut message, handler) {
                Ok(()) | Err(DecodeError::Stopped) => {}
                Err(err) => return Err(err),
            }

            let mut trailer = &cursor[message_len..];
            let before = trailer.len();
            self.transport.decode_frame_end(&mut trailer)?;
            header_len + message_len + (before - trailer.len())
        };

        buf.advance(consumed);
        Ok(DecodeStatus::Complete)
    }

    fn report(&self, buf: &mut &[u8], handler: &dyn ProtocolEventHandler) -> Result<(), DecodeError> {
        emit!(handler.transport_begin(None));
        // Completeness was established by the silent pass.
        if self.walk_message(buf, handler)?.is_some() {
            emit!(handler.transport_end());
        }
        Ok(())
    }

    fn walk_message(&self, buf: &mut &[u8], handler: &dyn ProtocolEventHandler) -> Walk {
        let metadata = need!(self.protocol.read_message_begin(buf));
        emit!(handler.message_begin(Rc::new(metadata)));
        need!(self.walk_struct(buf, handler, 0));
        emit!(handler.message_end());
        Ok(Some(()))
    }

    fn walk_struct(&self, buf: &mut &[u8], handler: &dyn ProtocolEventHandler, depth: usize) -> Walk {
        if depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::DepthExceeded(MAX_NESTING_DEPTH));
        }

        let name = need!(self.protocol.read_struct_begin(buf));
        emit!(handler.struct_begin(&name));
        loop {
            let (field_type, field_id) = need!(self.protocol.read_field_begin(buf));
            if field_type == FieldType::Stop {
                break;
            }
            emit!(handler.field_begin("", field_type, field_id));
            need!(self.walk_value(buf, handler, field_type, depth));
            emit!(handler.field_end());
        }
        emit!(handler.struct_end());
        Ok(Some(()))
    }

    fn walk_value(
        &self,
        buf: &mut &[u8],
        handler: &dyn ProtocolEventHandler,
        field_type: FieldType,
        depth: usize,
    ) -> Walk {
        // Containers recurse through here without passing walk_struct.
        if depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::DepthExceeded(MAX_NESTING_DEPTH));
        }
        let protocol = self.protocol.as_ref();
        match field_type {
            FieldType::Bool => emit!(handler.bool_value(need!(protocol.read_bool(buf)))),
            FieldType::Byte => emit!(handler.byte_value(need!(protocol.read_byte(buf)))),
            FieldType::Double => emit!(handler.double_value(need!(protocol.read_double(buf)))),
            FieldType::I16 => emit!(handler.int16_value(need!(protocol.read_i16(buf)))),
            FieldType::I32 => emit!(handler.int32_value(need!(protocol.read_i32(buf)))),
            FieldType::I64 => emit!(handler.int64_value(need!(protocol.read_i64(buf)))),
            FieldType::String => {
                let value = need!(protocol.read_string(buf));
                emit!(handler.string_value(&value));
            }
            FieldType::Struct => need!(self.walk_struct(buf, handler, depth + 1)),
            FieldType::Map => {
                let (key_type, value_type, size) = need!(protocol.read_map_begin(buf));
                emit!(handler.map_begin(key_type, value_type, size));
                for _ in 0..size {
                    need!(self.walk_value(buf, handler, key_type, depth + 1));
                    need!(self.walk_value(buf, handler, value_type, depth + 1));
                }
                emit!(handler.map_end());
            }
            FieldType::List => {
                let (elem_type, size) = need!(protocol.read_list_begin(buf));
                emit!(handler.list_begin(elem_type, size));
                for _ in 0..size {
                    need!(self.walk_value(buf, handler, elem_type, depth + 1));
                }
                emit!(handler.list_end());
            }
            FieldType::Set => {
                let (elem_type, size) = need!(protocol.read_set_begin(buf));
                emit!(handler.set_begin(elem_type, size));
                for _ in 0..size {
                    need!(self.walk_value(buf, handler, elem_type, depth + 1));
                }
                emit!(handler.set_end());
            }
            FieldType::Stop | FieldType::Void => {
                return Err(DecodeError::UnknownFieldType(field_type as i8));
            }
        }
        Ok(Some(()))
    }
}
