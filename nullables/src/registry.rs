//! Nullable peer registry and ban list.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use peerlink_messages::PeerAddress;
use peerlink_network::{BanList, ConnectionId, PeerRegistry};
use peerlink_types::NodeId;

#[derive(Default)]
struct State {
    claims: HashMap<NodeId, ConnectionId>,
    authenticated: HashSet<ConnectionId>,
    dropped: Vec<ConnectionId>,
    known: Vec<PeerAddress>,
    learned: Vec<PeerAddress>,
}

/// In-memory registry with an optional cap on authenticated peers.
pub struct NullRegistry {
    max_authenticated: usize,
    shutting_down: AtomicBool,
    state: Mutex<State>,
}

impl NullRegistry {
    pub fn new() -> Self {
        Self::with_max_authenticated(usize::MAX)
    }

    pub fn with_max_authenticated(max_authenticated: usize) -> Self {
        Self {
            max_authenticated,
            shutting_down: AtomicBool::new(false),
            state: Mutex::new(State::default()),
        }
    }

    pub fn set_shutting_down(&self, value: bool) {
        self.shutting_down.store(value, Ordering::SeqCst);
    }

    /// Addresses returned from [`PeerRegistry::peers_to_send`].
    pub fn add_known(&self, address: PeerAddress) {
        self.state.lock().known.push(address);
    }

    /// Addresses received in PEERS messages.
    pub fn learned(&self) -> Vec<PeerAddress> {
        self.state.lock().learned.clone()
    }

    pub fn dropped(&self) -> Vec<ConnectionId> {
        self.state.lock().dropped.clone()
    }

    pub fn authenticated_count(&self) -> usize {
        self.state.lock().authenticated.len()
    }

    pub fn holder_of(&self, node_id: &NodeId) -> Option<ConnectionId> {
        self.state.lock().claims.get(node_id).copied()
    }
}

impl Default for NullRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry for NullRegistry {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
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

    fn accept_authenticated(&self, conn: ConnectionId, _node_id: &NodeId) -> bool {
        let mut state = self.state.lock();
        if state.authenticated.len() >= self.max_authenticated {
            return false;
        }
        state.authenticated.insert(conn);
        true
    }

    fn on_dropped(&self, conn: ConnectionId, node_id: Option<&NodeId>) {
        let mut state = self.state.lock();
        state.authenticated.remove(&conn);
        if let Some(node_id) = node_id {
            if state.claims.get(node_id) == Some(&conn) {
                state.claims.remove(node_id);
            }
        }
        state.dropped.push(conn);
    }

    fn peers_to_send(&self, exclude: Option<&PeerAddress>, max: usize) -> Vec<PeerAddress> {
        self.state
            .lock()
            .known
            .iter()
            .filter(|a| Some(*a) != exclude)
            .take(max)
            .copied()
            .collect()
    }

    fn ensure_exists(&self, address: PeerAddress) {
        let mut state = self.state.lock();
        if !state.learned.contains(&address) {
            state.learned.push(address);
        }
    }
}

#[derive(Default)]
pub struct NullBanList {
    banned: Mutex<HashSet<NodeId>>,
}

impl NullBanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&self, node_id: NodeId) {
        self.banned.lock().insert(node_id);
    }
}

impl BanList for NullBanList {
    fn is_banned(&self, node_id: &NodeId) -> bool {
        self.banned.lock().contains(node_id)
    }
}
