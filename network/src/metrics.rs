//! Prometheus metrics for the network layer.
//!
//! Each [`Node`](crate::Node) owns one [`NetworkMetrics`] with a dedicated
//! [`Registry`], so several nodes in one process never collide on metric
//! names.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

pub struct NetworkMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Messages written to a peer, including handshake and control messages.
    pub messages_sent: IntCounter,
    /// Authorized messages accepted from peers.
    pub messages_received: IntCounter,
    /// Messages dropped because their token failed validation.
    pub messages_rejected: IntCounter,
    /// Inbound or outbound handshakes that did not complete.
    pub handshake_failures: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub inbound_connections: IntGauge,
    pub outbound_connections: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Keep-alive round trip, in milliseconds.
    pub keep_alive_rtt_ms: Histogram,
}

impl NetworkMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_sent = register_int_counter_with_registry!(
            Opts::new("harbor_messages_sent_total", "Total messages sent to peers"),
            registry
        )
        .expect("failed to register messages_sent counter");

        let messages_received = register_int_counter_with_registry!(
            Opts::new(
                "harbor_messages_received_total",
                "Total authorized messages received from peers"
            ),
            registry
        )
        .expect("failed to register messages_received counter");

        let messages_rejected = register_int_counter_with_registry!(
            Opts::new(
                "harbor_messages_rejected_total",
                "Total messages dropped for failing authorization"
            ),
            registry
        )
        .expect("failed to register messages_rejected counter");

        let handshake_failures = register_int_counter_with_registry!(
            Opts::new(
                "harbor_handshake_failures_total",
                "Total failed connection handshakes"
            ),
            registry
        )
        .expect("failed to register handshake_failures counter");

        let inbound_connections = register_int_gauge_with_registry!(
            Opts::new(
                "harbor_inbound_connections",
                "Current number of inbound connections"
            ),
            registry
        )
        .expect("failed to register inbound_connections gauge");

        let outbound_connections = register_int_gauge_with_registry!(
            Opts::new(
                "harbor_outbound_connections",
                "Current number of outbound connections"
            ),
            registry
        )
        .expect("failed to register outbound_connections gauge");

        // 1 ms → ~32 s
        let keep_alive_rtt_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "harbor_keep_alive_rtt_ms",
                "Keep-alive round trip time in milliseconds"
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 16).expect("valid bucket layout")),
            registry
        )
        .expect("failed to register keep_alive_rtt_ms histogram");

        Self {
            registry,
            messages_sent,
            messages_received,
            messages_rejected,
            handshake_failures,
            inbound_connections,
            outbound_connections,
            keep_alive_rtt_ms,
        }
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode network metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}
