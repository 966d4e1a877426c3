// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::error::DecodeError;
use crate::protocol::types::TransportType;
use crate::protocol::Transport;

/// Largest frame accepted by [`FramedTransport`] (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the framed transport length prefix.
const FRAME_HEADER_SIZE: usize = 4;

/// Frame header information returned by [`Transport::decode_frame_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStart {
    /// Bytes of message payload announced by the frame, if the transport
    /// knows it up front.
    pub size: Option<usize>,
}

/// Length-prefixed framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FramedTransport;

impl Transport for FramedTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Framed
    }

    fn encode_frame(&self, out: &mut BytesMut, message: &mut BytesMut) {
        out.reserve(FRAME_HEADER_SIZE + message.len());
        out.put_u32(message.len() as u32);
        out.put(message.split());
    }

    fn decode_frame_start(&self, buf: &mut &[u8]) -> Result<Option<FrameStart>, DecodeError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let size = (&buf[..FRAME_HEADER_SIZE]).get_i32();
        if size <= 0 {
            return Err(DecodeError::InvalidFrameSize(size));
        }
        let size = size as usize;
        if size > MAX_FRAME_SIZE {
            return Err(DecodeError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(FrameStart { size: Some(size) }))
    }

    fn decode_frame_end(&self, _buf: &mut &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Messages written back to back.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnframedTransport;

impl Transport for UnframedTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Unframed
    }

    fn encode_frame(&self, out: &mut BytesMut, message: &mut BytesMut) {
        out.put(message.split());
    }

    fn decode_frame_start(&self, _buf: &mut &[u8]) -> Result<Option<FrameStart>, DecodeError> {
        Ok(Some(FrameStart { size: None }))
    }

    fn decode_frame_end(&self, _buf: &mut &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}
