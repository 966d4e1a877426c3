// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use thrift_shadow::protocol::{ProtocolType, TransportType};
use thrift_shadow::shadow::{NullResponseDecoder, ResponseClassifier, ResponseStatus};

fuzz_target!(|data: &[u8]| {
    for transport in [TransportType::Framed, TransportType::Unframed] {
        let mut decoder = NullResponseDecoder::new(transport, ProtocolType::Binary);
        let mut buf = BytesMut::from(data);
        let before = buf.len();

        // Should never panic, and only a complete message consumes bytes
        match decoder.upstream_data(&mut buf) {
            ResponseStatus::Complete => assert!(buf.len() < before),
            ResponseStatus::MoreData | ResponseStatus::Reset => assert_eq!(buf.len(), before),
        }
    }
});
