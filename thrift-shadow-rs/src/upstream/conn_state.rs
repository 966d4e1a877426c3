// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::Cell;

/// Per-connection Thrift session data.
///
/// Requests multiplexed on one connection need distinct sequence ids; the
/// allocator lives with the connection so that it survives across requests
/// when the pool reuses it.
#[derive(Debug, Default)]
pub struct ThriftConnectionState {
    next_sequence_id: Cell<i32>,
}

impl ThriftConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next sequence id, wrapping to 0 after `i32::MAX`.
    pub fn next_sequence_id(&self) -> i32 {
        let id = self.next_sequence_id.get();
        self.next_sequence_id
            .set(if id == i32::MAX { 0 } else { id + 1 });
        id
    }
}
