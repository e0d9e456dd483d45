//! The node-wide view of every overlay connection.
//!
//! [`OverlayManager`] is the peers' [`PeerRegistry`] and [`BanList`], and it
//! drives the cross-peer work: advertising transactions, the periodic
//! demand pass, and trimming advert history as ledgers close.
//!
//! Registry callbacks arrive while the calling peer is locked, so they only
//! ever touch the manager's own state. Methods that visit peers copy the
//! handles out first and lock each peer with the registry lock released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use peerlink_messages::{ErrorCode, PeerAddress, TransactionEnvelope, TX_DEMAND_VECTOR_MAX_SIZE};
use peerlink_network::{
    BanList, ConnectionId, DropDirection, DropMode, PeerDiagnostics, PeerHandle, PeerRegistry,
    PeerRole, PeerState, TxPool,
};
use peerlink_types::{NodeId, TxHash};
use rand::seq::SliceRandom;
use tokio::time::Instant;

use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;
use crate::tracing_spans::broadcast_span;
use crate::tx_pool::MemoryTxPool;

/// Addresses kept in the address book.
const MAX_KNOWN_ADDRESSES: usize = 1_000;

/// A demanded hash is not demanded again from another peer until this
/// much time has passed without the transaction arriving.
const DEMAND_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Limits the manager enforces.
#[derive(Clone, Debug)]
pub struct OverlayLimits {
    pub max_inbound: usize,
    pub target_outbound: usize,
    pub max_authenticated: usize,
    pub max_demand_batch: usize,
}

struct PeerEntry {
    handle: PeerHandle,
    role: PeerRole,
    /// Dialled address for outbound peers.
    address: Option<PeerAddress>,
}

#[derive(Default)]
struct RegistryState {
    peers: HashMap<ConnectionId, PeerEntry>,
    claims: HashMap<NodeId, ConnectionId>,
    authenticated: HashSet<ConnectionId>,
    known: Vec<PeerAddress>,
    banned: HashSet<NodeId>,
    /// Our own listening address, never dialled or handed out.
    local_address: Option<PeerAddress>,
}

pub struct OverlayManager {
    limits: OverlayLimits,
    next_id: AtomicU64,
    shutdown: ShutdownController,
    tx_pool: Arc<MemoryTxPool>,
    metrics: Arc<NodeMetrics>,
    state: Mutex<RegistryState>,
    demanded: Mutex<HashMap<TxHash, Instant>>,
}

impl OverlayManager {
    pub fn new(
        limits: OverlayLimits,
        shutdown: ShutdownController,
        tx_pool: Arc<MemoryTxPool>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            limits,
            next_id: AtomicU64::new(1),
            shutdown,
            tx_pool,
            metrics,
            state: Mutex::new(RegistryState::default()),
            demanded: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn set_local_address(&self, address: PeerAddress) {
        let mut state = self.state.lock();
        state.known.retain(|a| *a != address);
        state.local_address = Some(address);
    }

    // ── Connections ─────────────────────────────────────────────────────

    /// Track a freshly created peer. Outbound peers pass the dialled address.
    pub fn add_peer(&self, handle: PeerHandle, role: PeerRole, address: Option<PeerAddress>) {
        let (id, state) = {
            let peer = handle.lock();
            (peer.id(), peer.state())
        };
        if state == PeerState::Closing {
            return;
        }
        self.state.lock().peers.insert(
            id,
            PeerEntry {
                handle,
                role,
                address,
            },
        );
    }

    /// Whether another inbound socket may be accepted.
    pub fn can_accept_inbound(&self) -> bool {
        !self.shutdown.is_triggered()
            && self.count_role(PeerRole::RemoteCalledUs) < self.limits.max_inbound
    }

    pub fn outbound_count(&self) -> usize {
        self.count_role(PeerRole::WeCalledRemote)
    }

    fn count_role(&self, role: PeerRole) -> usize {
        self.state
            .lock()
            .peers
            .values()
            .filter(|e| e.role == role)
            .count()
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.state.lock().authenticated.len()
    }

    /// Known addresses worth dialling now: not ourselves and not already
    /// connected, at most enough to reach the outbound target.
    pub fn dial_candidates(&self) -> Vec<PeerAddress> {
        let state = self.state.lock();
        let outbound = state
            .peers
            .values()
            .filter(|e| e.role == PeerRole::WeCalledRemote)
            .count();
        let wanted = self.limits.target_outbound.saturating_sub(outbound);
        if wanted == 0 {
            return Vec::new();
        }
        let connected: HashSet<PeerAddress> =
            state.peers.values().filter_map(|e| e.address).collect();
        let mut candidates: Vec<PeerAddress> = state
            .known
            .iter()
            .filter(|a| Some(**a) != state.local_address && !connected.contains(a))
            .copied()
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(wanted);
        candidates
    }

    /// Add an address from configuration to the address book.
    pub fn add_known_address(&self, address: PeerAddress) {
        self.ensure_exists(address);
    }

    fn handles(&self, authenticated_only: bool) -> Vec<PeerHandle> {
        let state = self.state.lock();
        state
            .peers
            .iter()
            .filter(|(id, _)| !authenticated_only || state.authenticated.contains(id))
            .map(|(_, e)| Arc::clone(&e.handle))
            .collect()
    }

    /// Ban `node_id` and drop any connection it holds.
    pub fn ban(&self, node_id: NodeId) {
        let holder = {
            let mut state = self.state.lock();
            state.banned.insert(node_id);
            state
                .claims
                .get(&node_id)
                .and_then(|conn| state.peers.get(conn))
                .map(|e| Arc::clone(&e.handle))
        };
        tracing::info!(node = %node_id.short(), "node banned");
        if let Some(handle) = holder {
            handle
                .lock()
                .send_error_and_drop(ErrorCode::Conf, "banned", DropMode::FlushWriteQueue);
        }
    }

    /// Drop every connection, flushing what is already queued.
    pub fn drop_all(&self, reason: &str) {
        for handle in self.handles(false) {
            handle.lock().drop_connection(
                reason,
                DropDirection::WeDroppedRemote,
                DropMode::FlushWriteQueue,
            );
        }
    }

    pub fn diagnostics(&self) -> Vec<PeerDiagnostics> {
        let mut out: Vec<PeerDiagnostics> = self
            .handles(false)
            .iter()
            .map(|h| h.lock().diagnostics())
            .collect();
        out.sort_by_key(|d| d.connection_id);
        out
    }

    /// [`diagnostics`](Self::diagnostics) as a JSON array.
    pub fn diagnostics_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.diagnostics())
    }

    // ── Flooding ────────────────────────────────────────────────────────

    /// Add a locally submitted transaction to the pool and advertise it to
    /// every authenticated peer. Returns the hash when the transaction was
    /// new.
    pub fn broadcast_transaction(&self, tx: TransactionEnvelope) -> Option<TxHash> {
        let hash = self.tx_pool.insert_local(tx)?;
        let _span = broadcast_span(&hash.to_string(), self.authenticated_count()).entered();
        self.metrics.tx_pool_size.set(self.tx_pool.len() as i64);
        self.advertise(hash);
        tracing::debug!("transaction queued for advertisement");
        Some(hash)
    }

    /// Queue `hash` for advertisement to every authenticated peer that has
    /// not already shown it knows the hash.
    pub fn advertise(&self, hash: TxHash) {
        self.metrics.transactions_broadcast.inc();
        for handle in self.handles(true) {
            let mut peer = handle.lock();
            if !peer.peer_knows_hash(&hash) {
                peer.queue_tx_hash_to_advertise(hash);
            }
        }
    }

    /// One demand pass: pull advertised hashes from each authenticated peer
    /// and demand the ones we neither hold nor recently demanded elsewhere.
    /// Returns how many hashes were demanded.
    pub fn demand_pass(&self) -> usize {
        let now = Instant::now();
        self.demanded
            .lock()
            .retain(|_, at| now.duration_since(*at) < DEMAND_RETRY_INTERVAL);

        let mut total = 0;
        for handle in self.handles(true) {
            let mut peer = handle.lock();
            let mut batch = Vec::new();
            let max_batch = self.limits.max_demand_batch.min(TX_DEMAND_VECTOR_MAX_SIZE);
            while batch.len() < max_batch {
                let Some(hash) = peer.pop_incoming_advert() else {
                    break;
                };
                if self.tx_pool.contains(&hash) || self.tx_pool.is_banned(&hash) {
                    continue;
                }
                let mut demanded = self.demanded.lock();
                if demanded.contains_key(&hash) {
                    continue;
                }
                demanded.insert(hash, now);
                batch.push(hash);
            }
            if batch.is_empty() {
                continue;
            }
            total += batch.len();
            self.metrics.demand_batch_size.observe(batch.len() as f64);
            peer.send_tx_demand(batch);
        }
        total
    }

    /// Forget advert history for ledgers before `ledger_seq` on every peer.
    pub fn clear_below(&self, ledger_seq: u32) {
        for handle in self.handles(false) {
            handle.lock().clear_below(ledger_seq);
        }
    }

    /// The largest accepted transaction grew by `delta` bytes.
    pub fn handle_tx_size_increase(&self, delta: u64) {
        self.tx_pool.raise_max_tx_size(delta);
        for handle in self.handles(true) {
            handle.lock().handle_tx_size_increase(delta);
        }
    }
}

impl PeerRegistry for OverlayManager {
    fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn claim_identity(&self, conn: ConnectionId, node_id: &NodeId) -> bool {
        let mut state = self.state.lock();
        match state.claims.get(node_id) {
            Some(holder) => *holder == conn,
            None => {
                state.claims.insert(*node_id, conn);
                true
            }
        }
    }

    fn accept_authenticated(&self, conn: ConnectionId, node_id: &NodeId) -> bool {
        let mut state = self.state.lock();
        if state.authenticated.len() >= self.limits.max_authenticated {
            tracing::debug!(peer = %conn, node = %node_id.short(), "authenticated set full");
            return false;
        }
        state.authenticated.insert(conn);
        true
    }

    fn on_dropped(&self, conn: ConnectionId, node_id: Option<&NodeId>) {
        let mut state = self.state.lock();
        state.peers.remove(&conn);
        state.authenticated.remove(&conn);
        if let Some(node_id) = node_id {
            if state.claims.get(node_id) == Some(&conn) {
                state.claims.remove(node_id);
            }
        }
    }

    fn peers_to_send(&self, exclude: Option<&PeerAddress>, max: usize) -> Vec<PeerAddress> {
        let state = self.state.lock();
        let mut out: Vec<PeerAddress> = state
            .known
            .iter()
            .filter(|a| Some(*a) != exclude)
            .copied()
            .collect();
        out.shuffle(&mut rand::thread_rng());
        out.truncate(max);
        out
    }

    fn ensure_exists(&self, address: PeerAddress) {
        let mut state = self.state.lock();
        if Some(address) == state.local_address || state.known.contains(&address) {
            return;
        }
        if state.known.len() >= MAX_KNOWN_ADDRESSES {
            let victim = rand::random::<usize>() % state.known.len();
            state.known.swap_remove(victim);
        }
        state.known.push(address);
        self.metrics.known_addresses.set(state.known.len() as i64);
    }
}

impl BanList for OverlayManager {
    fn is_banned(&self, node_id: &NodeId) -> bool {
        self.state.lock().banned.contains(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_types::PublicKey;
    use std::net::{IpAddr, Ipv4Addr};

    fn manager(limits: OverlayLimits) -> OverlayManager {
        let (pool, _rx) = MemoryTxPool::new(100, 1024);
        OverlayManager::new(
            limits,
            ShutdownController::new(),
            Arc::new(pool),
            Arc::new(NodeMetrics::new()),
        )
    }

    fn limits() -> OverlayLimits {
        OverlayLimits {
            max_inbound: 4,
            target_outbound: 2,
            max_authenticated: 1,
            max_demand_batch: 10,
        }
    }

    fn addr(last: u8) -> PeerAddress {
        PeerAddress {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            port: 11625,
        }
    }

    #[test]
    fn identity_claims_release_on_drop() {
        let m = manager(limits());
        let node = PublicKey([9u8; 32]);
        assert!(m.claim_identity(ConnectionId(1), &node));
        assert!(m.claim_identity(ConnectionId(1), &node));
        assert!(!m.claim_identity(ConnectionId(2), &node));
        m.on_dropped(ConnectionId(1), Some(&node));
        assert!(m.claim_identity(ConnectionId(2), &node));
    }

    #[test]
    fn authenticated_limit_is_enforced() {
        let m = manager(limits());
        let node = PublicKey([9u8; 32]);
        assert!(m.accept_authenticated(ConnectionId(1), &node));
        assert!(!m.accept_authenticated(ConnectionId(2), &node));
        m.on_dropped(ConnectionId(1), None);
        assert!(m.accept_authenticated(ConnectionId(2), &node));
    }

    #[test]
    fn address_book_excludes_self_and_duplicates() {
        let m = manager(limits());
        m.set_local_address(addr(1));
        m.ensure_exists(addr(1));
        m.ensure_exists(addr(2));
        m.ensure_exists(addr(2));
        m.ensure_exists(addr(3));
        let sent = m.peers_to_send(Some(&addr(3)), 10);
        assert_eq!(sent, vec![addr(2)]);
    }

    #[test]
    fn dial_candidates_stop_at_target() {
        let m = manager(limits());
        for i in 2..8 {
            m.add_known_address(addr(i));
        }
        assert_eq!(m.dial_candidates().len(), 2);
    }

    #[test]
    fn empty_diagnostics_serialize() {
        let m = manager(limits());
        assert_eq!(m.diagnostics_json().unwrap(), "[]");
    }

    #[test]
    fn bans_are_reported() {
        let m = manager(limits());
        let node = PublicKey([4u8; 32]);
        m.ban(node);
        assert!(m.is_banned(&node));
        assert!(!m.is_banned(&PublicKey([5u8; 32])));
    }

    #[test]
    fn oversized_local_transactions_are_not_broadcast() {
        let m = manager(limits());
        let big = TransactionEnvelope {
            payload: vec![1; 1025],
        };
        assert!(m.broadcast_transaction(big.clone()).is_none());
        m.handle_tx_size_increase(1);
        assert!(m.broadcast_transaction(big).is_some());
    }

    #[test]
    fn shutdown_is_visible_to_peers() {
        let shutdown = ShutdownController::new();
        let (pool, _rx) = MemoryTxPool::new(1, 1024);
        let m = OverlayManager::new(
            limits(),
            shutdown.clone(),
            Arc::new(pool),
            Arc::new(NodeMetrics::new()),
        );
        assert!(!m.is_shutting_down());
        shutdown.shutdown();
        assert!(m.is_shutting_down());
        assert!(!m.can_accept_inbound());
    }
}
