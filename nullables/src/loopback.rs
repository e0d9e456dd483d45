//! Two in-memory nodes joined by a pair of [`NullTransport`]s.
//!
//! Nothing moves until [`LoopbackPair::pump`] is called, which shuttles
//! frames both ways and drains both main queues until the pair goes quiet.
//! Timers still run on tokio time, so tests usually use a paused clock.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use peerlink_crypto::{keypair_from_seed, network_id_from_passphrase};
use peerlink_messages::PeerAddress;
use peerlink_network::{
    main_queue, ConnectionId, DefaultFloodPolicy, OverlayConfig, OverlayContext, OverlayMetrics,
    Peer, PeerAuth, PeerHandle, SchedulerWorker, SharedFloodBudget,
};
use peerlink_types::NodeId;

use crate::{NullBanList, NullConsensus, NullRegistry, NullTransport, NullTxPool};

pub const TEST_PASSPHRASE: &str = "peerlink loopback network";

/// Safety valve for [`LoopbackPair::pump`]; a well-behaved pair settles
/// long before this.
const MAX_PUMP_ROUNDS: usize = 10_000;

/// One node's overlay services, all nullable.
pub struct TestNode {
    pub ctx: OverlayContext,
    pub worker: SchedulerWorker,
    pub registry: Arc<NullRegistry>,
    pub ban_list: Arc<NullBanList>,
    pub tx_pool: Arc<NullTxPool>,
    pub consensus: Arc<NullConsensus>,
    pub metrics: Arc<OverlayMetrics>,
}

impl TestNode {
    pub fn new(seed: u8) -> Self {
        let config = OverlayConfig {
            peer_port: 11_000 + u16::from(seed),
            allow_localhost_for_testing: true,
            ..OverlayConfig::default()
        };
        Self::with_config(seed, config, TEST_PASSPHRASE)
    }

    pub fn with_config(seed: u8, config: OverlayConfig, passphrase: &str) -> Self {
        Self::with_registry(seed, config, passphrase, Arc::new(NullRegistry::new()))
    }

    pub fn with_registry(
        seed: u8,
        config: OverlayConfig,
        passphrase: &str,
        registry: Arc<NullRegistry>,
    ) -> Self {
        let auth = PeerAuth::new(
            network_id_from_passphrase(passphrase),
            keypair_from_seed(&[seed; 32]),
            config.auth_cert_lifetime_secs,
        );
        let (scheduler, worker) = main_queue(config.scheduler_latency_window());
        let ban_list = Arc::new(NullBanList::new());
        let tx_pool = Arc::new(NullTxPool::new());
        let consensus = Arc::new(NullConsensus::new());
        let metrics = Arc::new(OverlayMetrics::unregistered());
        let flood_budget = config
            .aggregate_flood_bytes_budget
            .map(|limit| Arc::new(SharedFloodBudget::new(limit)));
        let ctx = OverlayContext {
            config: Arc::new(config),
            auth: Arc::new(auth),
            registry: registry.clone(),
            ban_list: ban_list.clone(),
            tx_pool: tx_pool.clone(),
            consensus: consensus.clone(),
            flood_policy: Arc::new(DefaultFloodPolicy),
            scheduler,
            metrics: Arc::clone(&metrics),
            flood_budget,
        };
        Self {
            ctx,
            worker,
            registry,
            ban_list,
            tx_pool,
            consensus,
            metrics,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.ctx.auth.node_id()
    }

    pub fn address(&self) -> PeerAddress {
        PeerAddress {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: self.ctx.config.peer_port,
        }
    }
}

/// `a` called `b`.
pub struct LoopbackPair {
    pub a: TestNode,
    pub b: TestNode,
    pub a_peer: PeerHandle,
    pub b_peer: PeerHandle,
    /// Frames written by `a_peer`.
    pub a_transport: Arc<NullTransport>,
    /// Frames written by `b_peer`.
    pub b_transport: Arc<NullTransport>,
}

impl LoopbackPair {
    /// Create both ends and open the handshake. Must run inside a tokio
    /// runtime.
    pub fn connect(a: TestNode, b: TestNode) -> Self {
        let a_transport = Arc::new(NullTransport::new());
        let b_transport = Arc::new(NullTransport::new());
        let a_peer = Peer::new_outbound(
            ConnectionId(1),
            a.ctx.clone(),
            a_transport.clone(),
            b.address(),
        );
        let b_peer = Peer::new_inbound(ConnectionId(2), b.ctx.clone(), b_transport.clone());
        a_peer.lock().connected();
        Self {
            a,
            b,
            a_peer,
            b_peer,
            a_transport,
            b_transport,
        }
    }

    /// Two default nodes, already authenticated to each other.
    pub fn authenticated() -> Self {
        let mut pair = Self::connect(TestNode::new(1), TestNode::new(2));
        pair.pump();
        pair
    }

    /// Move frames and run queued tasks until nothing changes. Returns how
    /// many frames and tasks were processed.
    pub fn pump(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut progress = 0;
            progress += deliver(&self.a_transport, &self.b_peer, &self.b_transport);
            progress += deliver(&self.b_transport, &self.a_peer, &self.a_transport);
            progress += self.a.worker.run_pending();
            progress += self.b.worker.run_pending();
            if progress == 0 {
                break;
            }
            total += progress;
        }
        total
    }

    pub fn both_authenticated(&self) -> bool {
        self.a_peer.lock().is_authenticated() && self.b_peer.lock().is_authenticated()
    }
}

/// Hand `from`'s pending frames to `to`, respecting `to`'s read pause.
fn deliver(from: &NullTransport, to: &PeerHandle, to_transport: &NullTransport) -> usize {
    let mut delivered = 0;
    while !to_transport.is_paused() {
        let Some(payload) = from.take_outgoing() else {
            break;
        };
        delivered += 1;
        if to_transport.closed().is_none() {
            to.lock().submit(&payload);
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pair_completes_handshake() {
        let pair = LoopbackPair::authenticated();
        assert!(pair.both_authenticated());
        assert_eq!(pair.a.registry.authenticated_count(), 1);
        assert_eq!(pair.b.registry.authenticated_count(), 1);
    }
}
