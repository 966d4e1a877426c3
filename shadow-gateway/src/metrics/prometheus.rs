// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use thrift_shadow::shadow::{ShadowStats, StatsError};

/// Prometheus metrics for the shadow gateway.
///
/// Gateway metrics and the per-cluster shadow counters live in the same
/// registry, so `/metrics` exposes both.
#[derive(Clone)]
pub struct Metrics {
    /// Shadow request/response counters: {prefix}_upstream_*{cluster}
    shadow: ShadowStats,

    /// Downstream tap connections: gateway_tap_connections_total
    tap_connections: IntCounter,

    /// Open downstream tap connections: gateway_tap_active_connections
    tap_active: IntGauge,

    /// Decoded downstream messages: gateway_tap_messages_total{cluster, outcome}
    tap_messages: IntCounterVec,

    /// Downstream decode failures: gateway_tap_decode_errors_total
    tap_decode_errors: IntCounter,

    /// Upstream connection attempts: gateway_pool_connects_total{cluster, result}
    pool_connects: IntCounterVec,

    /// Lent connections closed for lack of a response: gateway_pool_response_timeouts_total{cluster}
    pool_response_timeouts: IntCounterVec,
}

impl Metrics {
    /// Create the registry with the gateway metrics and the shadow counters
    /// under `stat_prefix`.
    pub fn new(stat_prefix: &str) -> Result<Self, StatsError> {
        let registry = Registry::new();

        let tap_connections = IntCounter::with_opts(Opts::new(
            "gateway_tap_connections_total",
            "Downstream connections accepted by the tap",
        ))?;

        let tap_active = IntGauge::with_opts(Opts::new(
            "gateway_tap_active_connections",
            "Downstream connections currently open",
        ))?;

        let tap_messages = IntCounterVec::new(
            Opts::new(
                "gateway_tap_messages_total",
                "Downstream messages seen by the tap",
            ),
            &["cluster", "outcome"],
        )?;

        let tap_decode_errors = IntCounter::with_opts(Opts::new(
            "gateway_tap_decode_errors_total",
            "Downstream connections closed on undecodable or oversized traffic",
        ))?;

        let pool_connects = IntCounterVec::new(
            Opts::new(
                "gateway_pool_connects_total",
                "Upstream connection attempts",
            ),
            &["cluster", "result"],
        )?;

        let pool_response_timeouts = IntCounterVec::new(
            Opts::new(
                "gateway_pool_response_timeouts_total",
                "Upstream connections closed while waiting for a response",
            ),
            &["cluster"],
        )?;

        // Register all metrics
        registry.register(Box::new(tap_connections.clone()))?;
        registry.register(Box::new(tap_active.clone()))?;
        registry.register(Box::new(tap_messages.clone()))?;
        registry.register(Box::new(tap_decode_errors.clone()))?;
        registry.register(Box::new(pool_connects.clone()))?;
        registry.register(Box::new(pool_response_timeouts.clone()))?;

        let shadow = ShadowStats::register(stat_prefix, &registry)?;

        Ok(Self {
            shadow,
            tap_connections,
            tap_active,
            tap_messages,
            tap_decode_errors,
            pool_connects,
            pool_response_timeouts,
        })
    }

    pub fn shadow_stats(&self) -> ShadowStats {
        self.shadow.clone()
    }

    /// Record a downstream connection opening.
    pub fn tap_connection_opened(&self) {
        self.tap_connections.inc();
        self.tap_active.inc();
    }

    pub fn tap_connection_closed(&self) {
        self.tap_active.dec();
    }

    /// Record what happened to a downstream message: "mirrored", "ignored"
    /// or a skip reason.
    pub fn record_tap_message(&self, cluster: &str, outcome: &str) {
        self.tap_messages
            .with_label_values(&[cluster, outcome])
            .inc();
    }

    pub fn record_decode_error(&self) {
        self.tap_decode_errors.inc();
    }

    /// Record an upstream connection attempt: "connected", "reused",
    /// "refused" or "timeout".
    pub fn record_pool_connect(&self, cluster: &str, result: &str) {
        self.pool_connects
            .with_label_values(&[cluster, result])
            .inc();
    }

    pub fn record_response_timeout(&self, cluster: &str) {
        self.pool_response_timeouts
            .with_label_values(&[cluster])
            .inc();
    }

    /// Encode metrics in Prometheus text format. The shadow counters own a
    /// handle on the shared registry, so both sets are included.
    pub fn encode(&self) -> Result<String, StatsError> {
        self.shadow.encode()
    }
}
