//! Overlay metrics: node-wide Prometheus counters and per-peer diagnostics.

use std::time::Duration;

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};
use serde::Serialize;

use crate::advert::AdvertCounters;
use crate::auth::PeerRole;
use crate::flow_control::FlowControlSnapshot;
use crate::peer::{DropDirection, PeerState};

/// Node-wide overlay counters, registered into a caller-supplied registry.
pub struct OverlayMetrics {
    // ── Counters ────────────────────────────────────────────────────────
    pub messages_read: IntCounter,
    pub messages_written: IntCounter,
    pub bytes_read: IntCounter,
    pub bytes_written: IntCounter,
    /// Outbound messages shed under load or trimmed from flood queues.
    pub messages_dropped: IntCounter,
    /// Inbound flood messages discarded while out of sync.
    pub flood_skipped_out_of_sync: IntCounter,
    pub idle_timeouts: IntCounter,
    pub straggler_timeouts: IntCounter,
    pub no_flood_capacity_timeouts: IntCounter,
    pub connections_dropped: IntCounter,
    pub demands_fulfilled: IntCounter,
    pub demands_unfulfilled_banned: IntCounter,
    pub demands_unfulfilled_unknown: IntCounter,
    pub hashes_demanded: IntCounter,
    pub adverts_dropped: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub authenticated_peers: IntGauge,
    pub pending_peers: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    pub ping_latency_ms: Histogram,
}

impl OverlayMetrics {
    pub fn new(registry: &Registry) -> Self {
        macro_rules! counter {
            ($name:literal, $help:literal) => {
                register_int_counter_with_registry!(Opts::new($name, $help), registry)
                    .expect(concat!("failed to register ", $name, " counter"))
            };
        }
        macro_rules! gauge {
            ($name:literal, $help:literal) => {
                register_int_gauge_with_registry!(Opts::new($name, $help), registry)
                    .expect(concat!("failed to register ", $name, " gauge"))
            };
        }

        let ping_latency_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "peerlink_overlay_ping_latency_ms",
                "Peer round-trip latency in milliseconds"
            )
            .buckets(vec![
                1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0
            ]),
            registry
        )
        .expect("failed to register ping_latency_ms histogram");

        Self {
            messages_read: counter!(
                "peerlink_overlay_messages_read_total",
                "Authenticated messages read from peers"
            ),
            messages_written: counter!(
                "peerlink_overlay_messages_written_total",
                "Messages handed to peer transports"
            ),
            bytes_read: counter!("peerlink_overlay_bytes_read_total", "Frame bytes read"),
            bytes_written: counter!("peerlink_overlay_bytes_written_total", "Frame bytes written"),
            messages_dropped: counter!(
                "peerlink_overlay_messages_dropped_total",
                "Outbound messages shed or trimmed"
            ),
            flood_skipped_out_of_sync: counter!(
                "peerlink_overlay_flood_skipped_out_of_sync_total",
                "Inbound flood messages skipped while out of sync"
            ),
            idle_timeouts: counter!(
                "peerlink_overlay_idle_timeouts_total",
                "Connections dropped for inactivity"
            ),
            straggler_timeouts: counter!(
                "peerlink_overlay_straggler_timeouts_total",
                "Connections dropped for a stalled write queue"
            ),
            no_flood_capacity_timeouts: counter!(
                "peerlink_overlay_no_flood_capacity_timeouts_total",
                "Connections dropped after waiting too long for a flood grant"
            ),
            connections_dropped: counter!(
                "peerlink_overlay_connections_dropped_total",
                "Connections dropped for any reason"
            ),
            demands_fulfilled: counter!(
                "peerlink_overlay_demands_fulfilled_total",
                "Demanded transactions sent"
            ),
            demands_unfulfilled_banned: counter!(
                "peerlink_overlay_demands_unfulfilled_banned_total",
                "Demanded transactions not sent because they are banned"
            ),
            demands_unfulfilled_unknown: counter!(
                "peerlink_overlay_demands_unfulfilled_unknown_total",
                "Demanded transactions not sent because they are unknown"
            ),
            hashes_demanded: counter!(
                "peerlink_overlay_hashes_demanded_total",
                "Transaction hashes demanded from peers"
            ),
            adverts_dropped: counter!(
                "peerlink_overlay_adverts_dropped_total",
                "Hashes dropped from full advert queues"
            ),
            authenticated_peers: gauge!(
                "peerlink_overlay_authenticated_peers",
                "Currently authenticated peers"
            ),
            pending_peers: gauge!(
                "peerlink_overlay_pending_peers",
                "Connections still in the handshake"
            ),
            ping_latency_ms,
        }
    }

    /// Metrics in a private registry, for tests and tools.
    pub fn unregistered() -> Self {
        Self::new(&Registry::new())
    }
}

/// Plain per-connection counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PeerMetrics {
    pub messages_read: u64,
    pub messages_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub messages_dropped: u64,
    pub flood_skipped: u64,
    pub demands_sent: u64,
    pub demands_fulfilled: u64,
    pub demands_unfulfilled_banned: u64,
    pub demands_unfulfilled_unknown: u64,
}

/// Snapshot of one connection for observability tooling.
#[derive(Clone, Debug, Serialize)]
pub struct PeerDiagnostics {
    pub connection_id: u64,
    pub address: String,
    pub node_id: Option<String>,
    pub role: PeerRole,
    pub state: PeerState,
    pub remote_version: Option<String>,
    pub remote_overlay_version: Option<u32>,
    pub remote_overlay_min_version: Option<u32>,
    pub connected_for: Duration,
    pub latency: Option<Duration>,
    pub flow_control: Option<FlowControlSnapshot>,
    pub adverts: AdvertCounters,
    pub metrics: PeerMetrics,
    pub dropped: Option<DropDirection>,
}
