// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::BytesMut;

use crate::protocol::{
    create_protocol, create_transport, DecodeStatus, Decoder, FieldType, FilterStatus,
    MessageMetadata, MessageType, ProtocolEventHandler, ProtocolType, TransportType,
};

/// Progress of a mirrored response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    MoreData,
    Complete,
    /// The response could not be decoded; the connection must be closed.
    Reset,
}

/// Consumes a mirrored response far enough to know what it was.
pub trait ResponseClassifier {
    fn upstream_data(&mut self, data: &mut BytesMut) -> ResponseStatus;

    /// Kind of the response, once its header was decoded.
    fn message_type(&self) -> Option<MessageType>;

    /// Whether a reply carried a success result.
    fn success(&self) -> Option<bool>;
}

/// Response classifier that throws the payload away.
///
/// Only the header (message type, sequence id) and the id of the first field
/// of the reply struct are looked at: field 0 is the success slot of a Thrift
/// result struct, any other id is a declared exception.
pub struct NullResponseDecoder {
    decoder: Decoder,
    metadata: RefCell<Option<Rc<MessageMetadata>>>,
    success: Cell<Option<bool>>,
    first_reply_field: Cell<bool>,
    complete: Cell<bool>,
}

impl NullResponseDecoder {
    pub fn new(transport: TransportType, protocol: ProtocolType) -> Self {
        Self {
            decoder: Decoder::new(create_transport(transport), create_protocol(protocol)),
            metadata: RefCell::new(None),
            success: Cell::new(None),
            first_reply_field: Cell::new(false),
            complete: Cell::new(false),
        }
    }

    pub fn metadata(&self) -> Option<Rc<MessageMetadata>> {
        self.metadata.borrow().clone()
    }

    /// Override the outcome of the reply.
    pub fn set_success(&self, success: bool) {
        self.success.set(Some(success));
    }

    pub fn is_complete(&self) -> bool {
        self.complete.get()
    }
}

impl ProtocolEventHandler for NullResponseDecoder {
    fn message_begin(&self, metadata: Rc<MessageMetadata>) -> FilterStatus {
        self.first_reply_field
            .set(metadata.message_type == MessageType::Reply);
        if metadata.message_type == MessageType::Exception {
            self.success.set(Some(false));
        }
        *self.metadata.borrow_mut() = Some(metadata);
        FilterStatus::Continue
    }

    fn field_begin(&self, _name: &str, _field_type: FieldType, field_id: i16) -> FilterStatus {
        if self.first_reply_field.replace(false) {
            self.success.set(Some(field_id == 0));
        }
        FilterStatus::Continue
    }

    fn message_end(&self) -> FilterStatus {
        // A void reply has no field at all.
        if self.first_reply_field.replace(false) && self.success.get().is_none() {
            self.success.set(Some(true));
        }
        FilterStatus::Continue
    }

    fn transport_end(&self) -> FilterStatus {
        self.complete.set(true);
        FilterStatus::Continue
    }
}

impl ResponseClassifier for NullResponseDecoder {
    fn upstream_data(&mut self, data: &mut BytesMut) -> ResponseStatus {
        let this: &Self = self;
        match this.decoder.on_data(data, this) {
            Ok(DecodeStatus::Complete) => ResponseStatus::Complete,
            Ok(DecodeStatus::NeedMoreData) => ResponseStatus::MoreData,
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    framing = err.is_framing(),
                    "failed to decode shadow response"
                );
                ResponseStatus::Reset
            }
        }
    }

    fn message_type(&self) -> Option<MessageType> {
        self.metadata.borrow().as_ref().map(|m| m.message_type)
    }

    fn success(&self) -> Option<bool> {
        self.success.get()
    }
}
