// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::protocol::MessageType;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics are not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Counters kept per shadow cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowCounter {
    RequestCall,
    RequestOneway,
    ResponseReply,
    ResponseSuccess,
    ResponseError,
    ResponseException,
}

impl ShadowCounter {
    pub const ALL: [ShadowCounter; 6] = [
        Self::RequestCall,
        Self::RequestOneway,
        Self::ResponseReply,
        Self::ResponseSuccess,
        Self::ResponseError,
        Self::ResponseException,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestCall => "upstream_rq_call",
            Self::RequestOneway => "upstream_rq_oneway",
            Self::ResponseReply => "upstream_resp_reply",
            Self::ResponseSuccess => "upstream_resp_success",
            Self::ResponseError => "upstream_resp_error",
            Self::ResponseException => "upstream_resp_exception",
        }
    }

    fn help(&self) -> &'static str {
        match self {
            Self::RequestCall => "Shadow call requests submitted",
            Self::RequestOneway => "Shadow oneway requests submitted",
            Self::ResponseReply => "Shadow replies received",
            Self::ResponseSuccess => "Shadow replies carrying a success result",
            Self::ResponseError => "Shadow replies carrying a declared exception",
            Self::ResponseException => "Shadow application exceptions received",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Shadow traffic counters, labelled by cluster.
///
/// Counters are addressed by dotted name (`thrift.upstream_rq_call`) and
/// exported to Prometheus as `thrift_upstream_rq_call{cluster="..."}`.
#[derive(Clone)]
pub struct ShadowStats {
    prefix: String,
    registry: Registry,
    counters: Vec<IntCounterVec>,
}

impl ShadowStats {
    /// Create the counters in a registry of their own.
    pub fn new(prefix: &str) -> Result<Self, StatsError> {
        Self::register(prefix, &Registry::new())
    }

    /// Create the counters in an existing registry.
    pub fn register(prefix: &str, registry: &Registry) -> Result<Self, StatsError> {
        let metric_prefix = prefix.replace('.', "_");
        let mut counters = Vec::with_capacity(ShadowCounter::ALL.len());

        for counter in ShadowCounter::ALL {
            let vec = IntCounterVec::new(
                Opts::new(format!("{}_{}", metric_prefix, counter.name()), counter.help()),
                &["cluster"],
            )?;
            registry.register(Box::new(vec.clone()))?;
            counters.push(vec);
        }

        Ok(Self {
            prefix: prefix.to_string(),
            registry: registry.clone(),
            counters,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn inc(&self, cluster: &str, counter: ShadowCounter) {
        self.counters[counter as usize]
            .with_label_values(&[cluster])
            .inc();
    }

    /// Count a submitted request. Only calls and oneways are requests.
    pub fn inc_request(&self, cluster: &str, message_type: MessageType) {
        match message_type {
            MessageType::Call => self.inc(cluster, ShadowCounter::RequestCall),
            MessageType::Oneway => self.inc(cluster, ShadowCounter::RequestOneway),
            other => tracing::debug!(
                cluster = %cluster,
                message_type = %other,
                "not counting non-request message"
            ),
        }
    }

    /// Count a classified response.
    pub fn inc_response(&self, cluster: &str, message_type: MessageType, success: bool) {
        match message_type {
            MessageType::Reply => {
                self.inc(cluster, ShadowCounter::ResponseReply);
                let outcome = if success {
                    ShadowCounter::ResponseSuccess
                } else {
                    ShadowCounter::ResponseError
                };
                self.inc(cluster, outcome);
            }
            MessageType::Exception => self.inc(cluster, ShadowCounter::ResponseException),
            other => tracing::warn!(
                cluster = %cluster,
                message_type = %other,
                "unexpected message type in shadow response"
            ),
        }
    }

    pub fn value(&self, cluster: &str, counter: ShadowCounter) -> u64 {
        self.counters[counter as usize]
            .with_label_values(&[cluster])
            .get()
    }

    /// Look a counter up by its dotted name, e.g. `thrift.upstream_resp_reply`.
    /// Unknown names read as zero.
    pub fn counter(&self, cluster: &str, dotted_name: &str) -> u64 {
        dotted_name
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(ShadowCounter::from_name)
            .map(|counter| self.value(cluster, counter))
            .unwrap_or(0)
    }

    /// Sum of every counter for `cluster`.
    pub fn total(&self, cluster: &str) -> u64 {
        ShadowCounter::ALL
            .into_iter()
            .map(|counter| self.value(cluster, counter))
            .sum()
    }

    /// Encode the whole registry in Prometheus text format.
    pub fn encode(&self) -> Result<String, StatsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
