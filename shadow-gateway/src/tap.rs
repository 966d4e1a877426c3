// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Mirror listener.
//!
//! Clients (or a traffic tee in front of the primary service) send Thrift
//! requests to the tap. Each decoded request is replayed onto a shadow
//! router; nothing is ever written back to the client.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;
use thrift_shadow::protocol::transport::MAX_FRAME_SIZE;
use thrift_shadow::protocol::{
    create_protocol, create_transport, DecodeStatus, Decoder, FieldType, FilterStatus,
    ProtocolEventHandler,
};
use thrift_shadow::{
    MessageMetadata, MessageType, ProtocolType, ShadowRouterHandle, ShadowWriter, TransportType,
};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::metrics::Metrics;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Largest partial message a tap connection may buffer: the frame size
/// limit plus its length prefix. Unframed messages declare no length, so
/// this is their only bound.
pub const MAX_BUFFERED: usize = MAX_FRAME_SIZE + 4;

/// Everything a tap connection needs to mirror its traffic.
pub struct TapContext {
    pub writer: ShadowWriter,
    pub cluster: String,
    pub transport: TransportType,
    pub protocol: ProtocolType,
    /// Connections buffering more than this without completing a message
    /// are closed.
    pub max_buffered: usize,
    pub metrics: Metrics,
}

/// Accept tap connections until `shutdown` fires. Must run inside a `LocalSet`.
pub async fn serve(listener: TcpListener, ctx: Rc<TapContext>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "tap connection accepted");
                    tokio::task::spawn_local(handle_connection(stream, Rc::clone(&ctx)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tap accept failed");
                }
            },
            _ = shutdown.recv() => {
                tracing::info!("tap listener stopping");
                return;
            }
        }
    }
}

/// Decode one downstream connection and mirror every request on it.
pub async fn handle_connection(mut stream: TcpStream, ctx: Rc<TapContext>) {
    ctx.metrics.tap_connection_opened();

    let decoder = Decoder::new(create_transport(ctx.transport), create_protocol(ctx.protocol));
    let mirror = MirrorHandler::new(&ctx);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    'read: loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) => {
                if !buf.is_empty() {
                    tracing::debug!(bytes = buf.len(), "tap connection closed mid-message");
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "tap read failed");
                break;
            }
        }

        loop {
            match decoder.on_data(&mut buf, &mirror) {
                Ok(DecodeStatus::Complete) => continue,
                Ok(DecodeStatus::NeedMoreData) if buf.len() > ctx.max_buffered => {
                    tracing::warn!(
                        bytes = buf.len(),
                        limit = ctx.max_buffered,
                        "tap message exceeds buffer limit, closing connection"
                    );
                    ctx.metrics.record_decode_error();
                    break 'read;
                }
                Ok(DecodeStatus::NeedMoreData) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable tap traffic, closing connection");
                    ctx.metrics.record_decode_error();
                    break 'read;
                }
            }
        }
        buf.reserve(READ_BUFFER_SIZE);
    }

    ctx.metrics.tap_connection_closed();
}

/// Replays decoder events onto the shadow router of the current message.
struct MirrorHandler<'a> {
    ctx: &'a TapContext,
    current: RefCell<Option<ShadowRouterHandle>>,
}

impl<'a> MirrorHandler<'a> {
    fn new(ctx: &'a TapContext) -> Self {
        Self {
            ctx,
            current: RefCell::new(None),
        }
    }

    /// Forward one event. The shadow side never stops decoding of the tap.
    fn forward(&self, event: impl FnOnce(&dyn ProtocolEventHandler) -> FilterStatus) -> FilterStatus {
        let handle = self.current.borrow().clone();
        if let Some(handle) = handle {
            let _ = event(handle.request_owner());
        }
        FilterStatus::Continue
    }
}

impl ProtocolEventHandler for MirrorHandler<'_> {
    fn message_begin(&self, metadata: Rc<MessageMetadata>) -> FilterStatus {
        let ctx = self.ctx;
        if !matches!(metadata.message_type, MessageType::Call | MessageType::Oneway) {
            tracing::debug!(method = %metadata.method_name, message_type = ?metadata.message_type, "ignoring non-request message");
            ctx.metrics.record_tap_message(&ctx.cluster, "ignored");
            self.current.borrow_mut().take();
            return FilterStatus::Continue;
        }

        let submission = ctx.writer.submit(&ctx.cluster, Rc::clone(&metadata), ctx.transport, ctx.protocol);
        match submission.skip_reason() {
            Some(reason) => {
                tracing::debug!(method = %metadata.method_name, reason = %reason, "request not mirrored");
                ctx.metrics.record_tap_message(&ctx.cluster, reason.as_str());
            }
            None => ctx.metrics.record_tap_message(&ctx.cluster, "mirrored"),
        }
        *self.current.borrow_mut() = submission.into_handle();
        self.forward(|owner| owner.message_begin(metadata))
    }

    fn message_end(&self) -> FilterStatus {
        let status = self.forward(|owner| owner.message_end());
        self.current.borrow_mut().take();
        status
    }

    fn passthrough_data(&self, data: &mut BytesMut) -> FilterStatus {
        self.forward(|owner| owner.passthrough_data(data))
    }

    fn struct_begin(&self, name: &str) -> FilterStatus {
        self.forward(|owner| owner.struct_begin(name))
    }

    fn struct_end(&self) -> FilterStatus {
        self.forward(|owner| owner.struct_end())
    }

    fn field_begin(&self, name: &str, field_type: FieldType, field_id: i16) -> FilterStatus {
        self.forward(|owner| owner.field_begin(name, field_type, field_id))
    }

    fn field_end(&self) -> FilterStatus {
        self.forward(|owner| owner.field_end())
    }

    fn bool_value(&self, value: bool) -> FilterStatus {
        self.forward(|owner| owner.bool_value(value))
    }

    fn byte_value(&self, value: u8) -> FilterStatus {
        self.forward(|owner| owner.byte_value(value))
    }

    fn int16_value(&self, value: i16) -> FilterStatus {
        self.forward(|owner| owner.int16_value(value))
    }

    fn int32_value(&self, value: i32) -> FilterStatus {
        self.forward(|owner| owner.int32_value(value))
    }

    fn int64_value(&self, value: i64) -> FilterStatus {
        self.forward(|owner| owner.int64_value(value))
    }

    fn double_value(&self, value: f64) -> FilterStatus {
        self.forward(|owner| owner.double_value(value))
    }

    fn string_value(&self, value: &[u8]) -> FilterStatus {
        self.forward(|owner| owner.string_value(value))
    }

    fn map_begin(&self, key_type: FieldType, value_type: FieldType, size: u32) -> FilterStatus {
        self.forward(|owner| owner.map_begin(key_type, value_type, size))
    }

    fn map_end(&self) -> FilterStatus {
        self.forward(|owner| owner.map_end())
    }

    fn list_begin(&self, elem_type: FieldType, size: u32) -> FilterStatus {
        self.forward(|owner| owner.list_begin(elem_type, size))
    }

    fn list_end(&self) -> FilterStatus {
        self.forward(|owner| owner.list_end())
    }

    fn set_begin(&self, elem_type: FieldType, size: u32) -> FilterStatus {
        self.forward(|owner| owner.set_begin(elem_type, size))
    }

    fn set_end(&self) -> FilterStatus {
        self.forward(|owner| owner.set_end())
    }
}
