// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use thiserror::Error;

/// Errors raised while decoding a Thrift byte stream.
///
/// Running out of bytes is not an error: codecs report it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid frame size {0}")]
    InvalidFrameSize(i32),
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("frame declared {declared} bytes but message used {used}")]
    FrameSizeMismatch { declared: usize, used: usize },
    #[error("message does not fit in its {declared} byte frame")]
    TruncatedFrame { declared: usize },
    #[error("unsupported protocol version {0:#010x}")]
    BadVersion(u32),
    #[error("unknown message type {0}")]
    UnknownMessageType(i8),
    #[error("unknown field type {0}")]
    UnknownFieldType(i8),
    #[error("negative {what} length {len}")]
    NegativeLength { what: &'static str, len: i32 },
    #[error("nesting depth exceeds {0}")]
    DepthExceeded(usize),
    #[error("handler stopped iteration")]
    Stopped,
}

impl DecodeError {
    /// Whether the error originates in the framing layer rather than the
    /// message body.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrameSize(_)
                | Self::FrameTooLarge { .. }
                | Self::FrameSizeMismatch { .. }
                | Self::TruncatedFrame { .. }
        )
    }
}
