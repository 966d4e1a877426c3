// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Shadow traffic
//!
//! A [`ShadowWriter`] copies Thrift requests to a secondary cluster without
//! affecting the primary path. Each accepted request gets a [`ShadowRouter`]
//! that buffers the request until a connection is available, sends it, and
//! classifies the response into per-cluster counters ([`ShadowStats`]).
//! Shadow responses are never returned to anyone.

pub mod classifier;
pub mod router;
pub mod sink;
pub mod stats;
pub mod writer;

pub use classifier::{NullResponseDecoder, ResponseClassifier, ResponseStatus};
pub use router::{MetadataMatchCriteria, RouterState, ShadowRouter};
pub use stats::{ShadowCounter, ShadowStats, StatsError};
pub use writer::{ClassifierFactory, ShadowRouterHandle, ShadowWriter, SkipReason, Submission};
