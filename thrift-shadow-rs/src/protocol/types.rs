// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Thrift message kinds as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            3 => Some(Self::Exception),
            4 => Some(Self::Oneway),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Reply => "reply",
            Self::Exception => "exception",
            Self::Oneway => "oneway",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thrift field type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Stop = 0,
    Void = 1,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl FieldType {
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(Self::Stop),
            1 => Some(Self::Void),
            2 => Some(Self::Bool),
            3 => Some(Self::Byte),
            4 => Some(Self::Double),
            6 => Some(Self::I16),
            8 => Some(Self::I32),
            10 => Some(Self::I64),
            11 => Some(Self::String),
            12 => Some(Self::Struct),
            13 => Some(Self::Map),
            14 => Some(Self::Set),
            15 => Some(Self::List),
            _ => None,
        }
    }
}

/// Returned by every protocol event handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Keep delivering events.
    Continue,
    /// Stop delivering events for the current message.
    StopIteration,
}

/// Error returned when a transport or protocol name is not recognised.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownKind {
    pub kind: &'static str,
    pub value: String,
}

/// Framing used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// 4-byte big-endian length prefix per message.
    Framed,
    /// Messages back to back, no prefix.
    Unframed,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Framed => "framed",
            Self::Unframed => "unframed",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "framed" => Ok(Self::Framed),
            "unframed" => Ok(Self::Unframed),
            _ => Err(UnknownKind {
                kind: "transport",
                value: s.to_string(),
            }),
        }
    }
}

/// Serialization protocol used inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    Binary,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            _ => Err(UnknownKind {
                kind: "protocol",
                value: s.to_string(),
            }),
        }
    }
}

/// Header information of a single Thrift message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub method_name: String,
    pub message_type: MessageType,
    pub sequence_id: i32,
}

impl MessageMetadata {
    pub fn new(method_name: &str, message_type: MessageType, sequence_id: i32) -> Self {
        Self {
            method_name: method_name.to_string(),
            message_type,
            sequence_id,
        }
    }

    /// Copy of this header carrying a different sequence id.
    pub fn with_sequence_id(&self, sequence_id: i32) -> Self {
        Self {
            sequence_id,
            ..self.clone()
        }
    }

    pub fn is_oneway(&self) -> bool {
        self.message_type == MessageType::Oneway
    }
}
