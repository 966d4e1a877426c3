// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::rc::Rc;

use bytes::BytesMut;

use crate::protocol::{MessageMetadata, Protocol, Transport};
use crate::upstream::ClientConnection;

/// Where the events of a shadow request go.
///
/// Before the connection exists events are serialized into a local buffer;
/// afterwards they are serialized straight into the outbound message of the
/// connection. Both variants share the same encoding so bytes keep their
/// order across the switch.
pub enum EventSink {
    Buffering(BufferingSink),
    Live(LiveSink),
}

impl EventSink {
    pub fn buffering(protocol: Box<dyn Protocol>) -> Self {
        Self::Buffering(BufferingSink {
            protocol,
            buffer: BytesMut::new(),
            events: 0,
            message_complete: false,
        })
    }

    /// Serialize one event.
    pub fn encode(&mut self, write: impl FnOnce(&dyn Protocol, &mut BytesMut)) {
        match self {
            Self::Buffering(sink) => {
                write(sink.protocol.as_ref(), &mut sink.buffer);
                sink.events += 1;
            }
            Self::Live(sink) => write(sink.protocol.as_ref(), &mut sink.message),
        }
    }

    /// Finish the outbound message. A live sink hands back the frame to
    /// write; a buffering sink remembers that the message is complete.
    pub fn message_end(&mut self) -> Option<PendingWrite> {
        self.encode(|protocol, buf| protocol.write_message_end(buf));
        match self {
            Self::Buffering(sink) => {
                sink.message_complete = true;
                None
            }
            Self::Live(sink) => Some(sink.frame()),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

pub struct BufferingSink {
    protocol: Box<dyn Protocol>,
    buffer: BytesMut,
    events: usize,
    message_complete: bool,
}

impl BufferingSink {
    pub fn buffered_events(&self) -> usize {
        self.events
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Switch to a live sink on `connection`.
    ///
    /// The message header is written first, followed by everything buffered
    /// so far. When the message was already finished, the frame to write is
    /// returned with the sink; it carries every buffered event in one write.
    pub fn into_live(
        mut self,
        transport: Box<dyn Transport>,
        connection: Rc<dyn ClientConnection>,
        metadata: &MessageMetadata,
    ) -> (LiveSink, Option<PendingWrite>) {
        let mut message = BytesMut::with_capacity(self.buffer.len() + 64);
        self.protocol.write_message_begin(&mut message, metadata);
        message.unsplit(self.buffer.split());

        let mut live = LiveSink {
            protocol: self.protocol,
            transport,
            connection,
            message,
        };
        let pending = self.message_complete.then(|| live.frame());
        (live, pending)
    }
}

pub struct LiveSink {
    protocol: Box<dyn Protocol>,
    transport: Box<dyn Transport>,
    connection: Rc<dyn ClientConnection>,
    message: BytesMut,
}

impl LiveSink {
    fn frame(&mut self) -> PendingWrite {
        let mut data = BytesMut::with_capacity(self.message.len() + 4);
        self.transport.encode_frame(&mut data, &mut self.message);
        PendingWrite {
            connection: Rc::clone(&self.connection),
            data,
        }
    }
}

/// A frame ready to go out on a connection.
///
/// Writing is deferred to the caller so that no router state is borrowed
/// while the connection runs.
pub struct PendingWrite {
    connection: Rc<dyn ClientConnection>,
    data: BytesMut,
}

impl PendingWrite {
    /// Size of the frame, transport header included.
    pub fn frame_len(&self) -> usize {
        self.data.len()
    }

    pub fn send(mut self) {
        self.connection.write(&mut self.data, false);
    }
}
