//! Prometheus metrics for the node.
//!
//! [`NodeMetrics`] owns the registry. The overlay's own counters are
//! registered into the same registry so a single text encoding covers
//! both layers.

use std::sync::Arc;

use peerlink_network::OverlayMetrics;
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

/// Central collection of node-level metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,
    /// Counters shared with every peer.
    pub overlay: Arc<OverlayMetrics>,

    // ── Counters ────────────────────────────────────────────────────────
    /// Inbound sockets handed to a new peer.
    pub connections_accepted: IntCounter,
    /// Inbound sockets closed immediately because the node was full.
    pub connections_rejected: IntCounter,
    /// Outbound dials that failed before the socket came up.
    pub dial_failures: IntCounter,
    /// Transactions queued for advertisement to peers.
    pub transactions_broadcast: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub tx_pool_size: IntGauge,
    pub known_addresses: IntGauge,
    pub ledger_seq: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Hashes demanded per demand pass.
    pub demand_batch_size: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let overlay = Arc::new(OverlayMetrics::new(&registry));

        let connections_accepted = register_int_counter_with_registry!(
            Opts::new(
                "peerlink_connections_accepted_total",
                "Inbound connections accepted"
            ),
            registry
        )
        .expect("failed to register connections_accepted counter");

        let connections_rejected = register_int_counter_with_registry!(
            Opts::new(
                "peerlink_connections_rejected_total",
                "Inbound connections refused at accept"
            ),
            registry
        )
        .expect("failed to register connections_rejected counter");

        let dial_failures = register_int_counter_with_registry!(
            Opts::new("peerlink_dial_failures_total", "Failed outbound dials"),
            registry
        )
        .expect("failed to register dial_failures counter");

        let transactions_broadcast = register_int_counter_with_registry!(
            Opts::new(
                "peerlink_transactions_broadcast_total",
                "Transactions queued for advertisement"
            ),
            registry
        )
        .expect("failed to register transactions_broadcast counter");

        let tx_pool_size = register_int_gauge_with_registry!(
            Opts::new("peerlink_tx_pool_size", "Transactions held in the pool"),
            registry
        )
        .expect("failed to register tx_pool_size gauge");

        let known_addresses = register_int_gauge_with_registry!(
            Opts::new("peerlink_known_addresses", "Addresses in the address book"),
            registry
        )
        .expect("failed to register known_addresses gauge");

        let ledger_seq = register_int_gauge_with_registry!(
            Opts::new("peerlink_ledger_seq", "Ledger currently tracked"),
            registry
        )
        .expect("failed to register ledger_seq gauge");

        let demand_batch_size = register_histogram_with_registry!(
            HistogramOpts::new(
                "peerlink_demand_batch_size",
                "Hashes demanded from one peer per pass"
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
            registry
        )
        .expect("failed to register demand_batch_size histogram");

        Self {
            registry,
            overlay,
            connections_accepted,
            connections_rejected,
            dial_failures,
            transactions_broadcast,
            tx_pool_size,
            known_addresses,
            ledger_seq,
            demand_batch_size,
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
