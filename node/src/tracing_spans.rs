//! Pre-built [`tracing::Span`] constructors for overlay operations.
//!
//! Using consistent span names and field sets across the node makes it easy
//! to filter and correlate a single connection's events.

use std::net::SocketAddr;

use tracing::{debug_span, info_span, Span};

use peerlink_network::ConnectionId;

/// Span covering the lifetime of one TCP connection.
pub fn connection_span(conn: ConnectionId, remote: SocketAddr, inbound: bool) -> Span {
    info_span!("connection", conn = %conn, remote = %remote, inbound)
}

/// Span covering an outbound dial attempt.
pub fn dial_span(target: &str) -> Span {
    info_span!("dial", target = %target)
}

/// Span covering one pass over incoming adverts.
pub fn demand_pass_span(peer_count: usize) -> Span {
    debug_span!("demand_pass", peer_count)
}

/// Span covering the broadcast of a locally submitted transaction.
pub fn broadcast_span(tx_hash: &str, peer_count: usize) -> Span {
    info_span!("broadcast", tx = %tx_hash, peer_count)
}
