// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Thrift Shadow - Fire-and-forget request mirroring for Thrift RPC
//!
//! This crate mirrors Thrift requests to a shadow cluster. The caller replays
//! the protocol events of each request on a handle obtained from a
//! [`ShadowWriter`]; the request is buffered until a pooled connection is
//! ready, sent, and its response classified into per-cluster counters.
//!
//! The cluster manager and its connection pools are consumed through the
//! traits in [`upstream`], so the crate runs on any single-threaded event
//! loop.
//!
//! # Example
//!
//! ```rust
//! use thrift_shadow::inspect_message;
//! use thrift_shadow::protocol::{create_protocol, create_transport};
//! use thrift_shadow::protocol::{FieldType, MessageMetadata, MessageType, ProtocolType, TransportType};
//! use bytes::BytesMut;
//!
//! let protocol = create_protocol(ProtocolType::Binary);
//! let mut message = BytesMut::new();
//! protocol.write_message_begin(&mut message, &MessageMetadata::new("ping", MessageType::Reply, 7));
//! protocol.write_struct_begin(&mut message, "");
//! protocol.write_field_begin(&mut message, "", FieldType::Stop, 0);
//! protocol.write_struct_end(&mut message);
//! protocol.write_message_end(&mut message);
//!
//! let mut frame = BytesMut::new();
//! create_transport(TransportType::Framed).encode_frame(&mut frame, &mut message);
//!
//! let summary = inspect_message(&frame, TransportType::Framed, ProtocolType::Binary)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(summary.metadata.method_name, "ping");
//! assert_eq!(summary.success, Some(true));
//! ```

pub mod protocol;
pub mod shadow;
pub mod upstream;

use bytes::BytesMut;

use protocol::{create_protocol, create_transport, DecodeStatus, Decoder};

// Re-export commonly used types at the crate root
pub use protocol::{DecodeError, MessageMetadata, MessageType, ProtocolType, TransportType};
pub use shadow::{ShadowRouterHandle, ShadowStats, ShadowWriter, SkipReason, Submission};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a single message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub metadata: MessageMetadata,
    /// Outcome of a reply: `Some(true)` for a success result, `Some(false)`
    /// for a declared or application exception, `None` for requests.
    pub success: Option<bool>,
}

/// Decode the first message in `data` the way shadow responses are
/// classified.
///
/// Returns `Ok(None)` when `data` does not hold a complete message.
pub fn inspect_message(
    data: &[u8],
    transport: TransportType,
    protocol: ProtocolType,
) -> Result<Option<MessageSummary>, DecodeError> {
    let decoder = Decoder::new(create_transport(transport), create_protocol(protocol));
    let classifier = shadow::NullResponseDecoder::new(transport, protocol);
    let mut buf = BytesMut::from(data);

    match decoder.on_data(&mut buf, &classifier)? {
        DecodeStatus::NeedMoreData => Ok(None),
        DecodeStatus::Complete => Ok(classifier.metadata().map(|metadata| MessageSummary {
            metadata: (*metadata).clone(),
            success: shadow::ResponseClassifier::success(&classifier),
        })),
    }
}
