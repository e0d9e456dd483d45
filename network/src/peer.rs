//! One overlay connection.
//!
//! A [`Peer`] drives the handshake (HELLO, then AUTH), checks the MAC on
//! every later message, rations inbound traffic through [`FlowControl`], and
//! hands authenticated messages to the main queue for processing. It owns
//! the connection's timers and its advert/demand state.
//!
//! Peers live behind [`PeerHandle`]. Timer callbacks and main-queue tasks
//! capture only a `Weak` handle, so dropping the last strong handle ends
//! every pending callback.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use peerlink_crypto::{hash_transaction, sha256};
use peerlink_messages::{
    Auth, AuthenticatedMessage, DontHave, ErrorCode, FloodAdvert, FloodDemand, Hello, MessageType,
    OverlayMessage, PeerAddress, AUTH_MSG_FLAG_FLOW_CONTROL_BYTES_REQUESTED,
    TX_DEMAND_VECTOR_MAX_SIZE,
};
use peerlink_protocol::codec::{decode_envelope, encode_envelope, frame, message_size};
use peerlink_protocol::version::versions_overlap;
use peerlink_protocol::FIRST_VERSION_SUPPORTING_FLOW_CONTROL_IN_BYTES;
use peerlink_types::{Hash256, NodeId, Nonce, Timestamp, TxHash};
use serde::Serialize;
use tokio::time::Instant;

use crate::advert::{OutgoingAdvert, TxAdverts};
use crate::auth::PeerRole;
use crate::capacity::{CapacityMode, MessageCharge};
use crate::dispatch::{is_shedding_exempt, ActionType, MessageCategory};
use crate::flow_control::FlowControl;
use crate::mac::MacState;
use crate::metrics::{PeerDiagnostics, PeerMetrics};
use crate::overlay::{ConnectionId, OverlayContext, TxReceiveOutcome};
use crate::scheduler::Scheduler;
use crate::timer::PeerTimer;
use crate::transport::{DropMode, PeerTransport};

/// Longest remote ERROR text we keep for logs.
const MAX_REMOTE_ERROR_LEN: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PeerState {
    Connecting,
    Connected,
    GotHello,
    GotAuth,
    Closing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DropDirection {
    WeDroppedRemote,
    RemoteDroppedUs,
}

pub type PeerHandle = Arc<Mutex<Peer>>;

pub struct Peer {
    id: ConnectionId,
    ctx: OverlayContext,
    transport: Arc<dyn PeerTransport>,
    weak_self: Weak<Mutex<Peer>>,
    role: PeerRole,
    state: PeerState,

    remote_ip: std::net::IpAddr,
    address: Option<PeerAddress>,
    node_id: Option<NodeId>,
    remote_overlay_version: Option<u32>,
    remote_overlay_min_version: Option<u32>,
    remote_version: Option<String>,

    send_nonce: Nonce,
    mac: Option<MacState>,
    flow_control: Option<FlowControl>,
    adverts: TxAdverts,

    created_at: Instant,
    last_read: Instant,
    last_write: Instant,
    ping: Option<(Hash256, Instant)>,
    last_ping: Option<Duration>,

    metrics: PeerMetrics,
    advert_timer: PeerTimer,
    recurrent_timer: PeerTimer,
    reading_paused: bool,
    accepted: bool,
    drop_direction: Option<DropDirection>,
    drop_reason: Option<String>,
}

impl Peer {
    /// A connection we are opening to `address`. Call [`connected`](Self::connected)
    /// once the socket is up.
    pub fn new_outbound(
        id: ConnectionId,
        ctx: OverlayContext,
        transport: Arc<dyn PeerTransport>,
        address: PeerAddress,
    ) -> PeerHandle {
        Self::spawn(
            id,
            ctx,
            transport,
            PeerRole::WeCalledRemote,
            PeerState::Connecting,
            Some(address),
        )
    }

    /// A connection accepted on our listener. Waits for the remote's HELLO.
    pub fn new_inbound(
        id: ConnectionId,
        ctx: OverlayContext,
        transport: Arc<dyn PeerTransport>,
    ) -> PeerHandle {
        Self::spawn(
            id,
            ctx,
            transport,
            PeerRole::RemoteCalledUs,
            PeerState::Connected,
            None,
        )
    }

    fn spawn(
        id: ConnectionId,
        ctx: OverlayContext,
        transport: Arc<dyn PeerTransport>,
        role: PeerRole,
        state: PeerState,
        address: Option<PeerAddress>,
    ) -> PeerHandle {
        let now = Instant::now();
        let remote_ip = transport.remote_ip();
        let adverts = TxAdverts::new(&ctx.config);
        ctx.metrics.pending_peers.inc();
        let handle = Arc::new_cyclic(|weak_self| {
            Mutex::new(Peer {
                id,
                ctx,
                transport,
                weak_self: weak_self.clone(),
                role,
                state,
                remote_ip,
                address,
                node_id: None,
                remote_overlay_version: None,
                remote_overlay_min_version: None,
                remote_version: None,
                send_nonce: Nonce(rand::random()),
                mac: None,
                flow_control: None,
                adverts,
                created_at: now,
                last_read: now,
                last_write: now,
                ping: None,
                last_ping: None,
                metrics: PeerMetrics::default(),
                advert_timer: PeerTimer::new(),
                recurrent_timer: PeerTimer::new(),
                reading_paused: false,
                accepted: false,
                drop_direction: None,
                drop_reason: None,
            })
        });
        handle.lock().start_recurrent_timer();
        tracing::debug!(peer = %id, ip = %remote_ip, role = ?role, "new peer");
        handle
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == PeerState::GotAuth
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    pub fn address(&self) -> Option<&PeerAddress> {
        self.address.as_ref()
    }

    pub fn flow_control(&self) -> Option<&FlowControl> {
        self.flow_control.as_ref()
    }

    pub fn drop_reason(&self) -> Option<&str> {
        self.drop_reason.as_deref()
    }

    pub fn drop_direction(&self) -> Option<DropDirection> {
        self.drop_direction
    }

    /// Next send and expected receive sequence numbers, once keys exist.
    pub fn mac_sequences(&self) -> Option<(u64, u64)> {
        self.mac
            .as_ref()
            .map(|mac| (mac.send_sequence(), mac.recv_sequence()))
    }

    pub fn last_ping(&self) -> Option<Duration> {
        self.last_ping
    }

    pub fn metrics(&self) -> &PeerMetrics {
        &self.metrics
    }

    fn should_abort(&self) -> bool {
        self.state == PeerState::Closing || self.ctx.registry.is_shutting_down()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// The outbound socket connected; open the handshake.
    pub fn connected(&mut self) {
        if self.state != PeerState::Connecting {
            return;
        }
        self.state = PeerState::Connected;
        self.send_hello();
    }

    pub fn connect_failed(&mut self, reason: &str) {
        self.drop_connection(
            format!("connect failed: {reason}"),
            DropDirection::WeDroppedRemote,
            DropMode::IgnoreWriteQueue,
        );
    }

    /// Drop the connection. Idempotent; later calls are ignored.
    pub fn drop_connection(
        &mut self,
        reason: impl Into<String>,
        direction: DropDirection,
        mode: DropMode,
    ) {
        if self.state == PeerState::Closing {
            return;
        }
        let reason = reason.into();
        self.state = PeerState::Closing;
        self.advert_timer.cancel();
        self.recurrent_timer.cancel();
        self.transport.close(mode);
        self.ctx.registry.on_dropped(self.id, self.node_id.as_ref());

        self.ctx.metrics.connections_dropped.inc();
        if self.accepted {
            self.ctx.metrics.authenticated_peers.dec();
        } else {
            self.ctx.metrics.pending_peers.dec();
        }

        tracing::info!(
            peer = %self.id,
            node = %self.node_id.map(|n| n.short()).unwrap_or_default(),
            direction = ?direction,
            reason = %reason,
            "dropping peer"
        );
        self.drop_direction = Some(direction);
        self.drop_reason = Some(reason);
    }

    pub fn send_error_and_drop(&mut self, code: ErrorCode, msg: impl Into<String>, mode: DropMode) {
        let msg = msg.into();
        self.send_message(OverlayMessage::error(code, msg.clone()));
        self.drop_connection(msg, DropDirection::WeDroppedRemote, mode);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Feed one frame payload (length prefix already stripped) read from the
    /// transport.
    pub fn submit(&mut self, payload: &[u8]) {
        if self.should_abort() {
            return;
        }
        self.last_read = Instant::now();
        self.metrics.bytes_read += payload.len() as u64;
        self.ctx.metrics.bytes_read.inc_by(payload.len() as u64);

        match decode_envelope(payload) {
            Ok(envelope) => {
                self.metrics.messages_read += 1;
                self.ctx.metrics.messages_read.inc();
                self.recv_authenticated(envelope);
            }
            Err(e) => {
                tracing::debug!(peer = %self.id, error = %e, "undecodable frame");
                self.drop_connection(
                    "malformed message",
                    DropDirection::WeDroppedRemote,
                    DropMode::IgnoreWriteQueue,
                );
            }
        }
    }

    fn recv_authenticated(&mut self, envelope: AuthenticatedMessage) {
        let msg_type = envelope.message.message_type();
        if self.state >= PeerState::GotHello && msg_type != MessageType::Error {
            let result = match self.mac.as_mut() {
                Some(mac) => mac.open(&envelope),
                None => Ok(()),
            };
            if let Err(e) = result {
                tracing::debug!(peer = %self.id, msg_type = %msg_type, error = %e, "MAC check failed");
                self.send_error_and_drop(ErrorCode::Auth, e.to_string(), DropMode::IgnoreWriteQueue);
                return;
            }
        }
        self.recv_message(envelope.message);
    }

    fn recv_message(&mut self, message: OverlayMessage) {
        let msg_type = message.message_type();
        let category = MessageCategory::of(msg_type);
        if category == MessageCategory::Handshake || !self.is_authenticated() {
            self.recv_raw_message(message);
            return;
        }

        let flood = self.ctx.flood_policy.is_flood_message(msg_type);
        let size = message_size(&message);
        let locked = match self.flow_control.as_mut() {
            Some(fc) => fc.lock_local_capacity(size, flood).map(|charge| (charge, fc.can_read())),
            None => {
                self.recv_raw_message(message);
                return;
            }
        };
        let charge = match locked {
            Ok((charge, can_read)) => {
                if !can_read && !self.reading_paused {
                    self.reading_paused = true;
                    self.transport.pause_reading();
                }
                charge
            }
            Err(e) => {
                tracing::debug!(peer = %self.id, msg_type = %msg_type, error = %e, "capacity violation");
                self.drop_connection(
                    e.to_string(),
                    DropDirection::WeDroppedRemote,
                    DropMode::IgnoreWriteQueue,
                );
                return;
            }
        };

        if category == MessageCategory::TransactionFlood && self.ctx.consensus.is_out_of_sync() {
            self.metrics.flood_skipped += 1;
            self.ctx.metrics.flood_skipped_out_of_sync.inc();
            tracing::trace!(peer = %self.id, msg_type = %msg_type, "out of sync, skipping flood message");
            self.end_message_processing(charge);
            return;
        }

        let guard = CapacityGuard {
            peer: self.weak_self.clone(),
            charge: Some(charge),
            scheduler: self.ctx.scheduler.clone(),
        };
        let weak = self.weak_self.clone();
        let posted = self.ctx.scheduler.post(
            category_task_name(category),
            category.action_type(),
            move || {
                let Some(peer) = weak.upgrade() else {
                    return;
                };
                let mut peer = peer.lock();
                if !peer.should_abort() {
                    peer.recv_raw_message(message);
                }
                guard.finish(&mut peer);
            },
        );
        if !posted {
            tracing::debug!(peer = %self.id, msg_type = %msg_type, "main queue closed, message discarded");
        }
    }

    /// Return capacity for a processed (or discarded) message: sends the
    /// grant it unlocks and resumes reading once there is room again.
    fn end_message_processing(&mut self, charge: MessageCharge) {
        let Some(fc) = self.flow_control.as_mut() else {
            return;
        };
        let grant = fc.release_local_capacity(charge);
        let can_read = fc.can_read();
        if self.should_abort() {
            return;
        }
        if let Some(grant) = grant {
            self.send_authenticated(grant);
        }
        if self.reading_paused && can_read {
            self.reading_paused = false;
            self.transport.resume_reading();
        }
    }

    fn recv_raw_message(&mut self, message: OverlayMessage) {
        let msg_type = message.message_type();
        if !self.is_authenticated()
            && !matches!(
                msg_type,
                MessageType::Hello | MessageType::Auth | MessageType::Error
            )
        {
            self.drop_connection(
                format!("received {msg_type} before completed handshake"),
                DropDirection::WeDroppedRemote,
                DropMode::IgnoreWriteQueue,
            );
            return;
        }

        match message {
            OverlayMessage::Error(err) => {
                let text = sanitize_remote_text(&err.msg);
                self.drop_connection(
                    format!("{} ({text})", err.code.as_str()),
                    DropDirection::RemoteDroppedUs,
                    DropMode::IgnoreWriteQueue,
                );
            }
            OverlayMessage::Hello(hello) => self.recv_hello(hello),
            OverlayMessage::Auth(auth) => self.recv_auth(auth),
            OverlayMessage::DontHave(dont_have) => {
                if dont_have.msg_type == MessageType::GetScpQuorumSet {
                    self.maybe_process_ping_response(&dont_have.req_hash);
                }
                if let Some(node_id) = self.node_id {
                    self.ctx.consensus.dont_have(&node_id, &dont_have);
                }
            }
            OverlayMessage::GetPeers => self.send_peers(),
            OverlayMessage::Peers(peers) => self.recv_peers(peers),
            OverlayMessage::GetTxSet(hash) => match self.ctx.consensus.tx_set(&hash) {
                Some(set) => self.send_message(OverlayMessage::TxSet(set)),
                None => self.send_dont_have(MessageType::GetTxSet, hash),
            },
            OverlayMessage::TxSet(set) => {
                if let Some(node_id) = self.node_id {
                    self.ctx.consensus.recv_tx_set(&node_id, set);
                }
            }
            OverlayMessage::GetScpQuorumSet(hash) => match self.ctx.consensus.quorum_set(&hash) {
                Some(set) => self.send_message(OverlayMessage::ScpQuorumSet(set)),
                None => self.send_dont_have(MessageType::GetScpQuorumSet, hash),
            },
            OverlayMessage::ScpQuorumSet(set) => {
                self.maybe_process_ping_response(&set.hash);
                if let Some(node_id) = self.node_id {
                    self.ctx.consensus.recv_quorum_set(&node_id, set);
                }
            }
            OverlayMessage::ScpMessage(envelope) => {
                if let Some(node_id) = self.node_id {
                    self.ctx.consensus.recv_scp_envelope(&node_id, envelope);
                }
            }
            OverlayMessage::GetScpState(from_ledger) => {
                for envelope in self.ctx.consensus.scp_state(from_ledger) {
                    self.send_message(OverlayMessage::ScpMessage(envelope));
                }
            }
            grant @ (OverlayMessage::SendMore(_) | OverlayMessage::SendMoreExtended(_)) => {
                self.recv_send_more(&grant)
            }
            OverlayMessage::FloodAdvert(advert) => {
                let seq = self.ctx.consensus.tracking_ledger_seq();
                self.adverts.receive_advert(&advert.tx_hashes, seq);
            }
            OverlayMessage::FloodDemand(demand) => self.fulfill_demand(&demand),
            OverlayMessage::Transaction(tx) => {
                let hash = hash_transaction(&tx.payload);
                let seq = self.ctx.consensus.tracking_ledger_seq();
                self.adverts.remember(hash, seq);
                if let Some(node_id) = self.node_id {
                    let outcome = self.ctx.tx_pool.receive(&node_id, tx);
                    if outcome == TxReceiveOutcome::Rejected {
                        tracing::trace!(peer = %self.id, hash = %hash, "transaction rejected");
                    }
                }
            }
        }
    }

    fn recv_hello(&mut self, hello: Hello) {
        if self.state >= PeerState::GotHello {
            self.send_error_and_drop(
                ErrorCode::Misc,
                "received unexpected HELLO",
                DropMode::IgnoreWriteQueue,
            );
            return;
        }

        let auth = Arc::clone(&self.ctx.auth);
        if let Err(e) = auth.verify_remote_auth_cert(Timestamp::now(), &hello.peer_id, &hello.cert) {
            tracing::debug!(peer = %self.id, error = %e, "rejecting HELLO");
            self.send_error_and_drop(
                ErrorCode::Auth,
                "failed to verify auth cert",
                DropMode::IgnoreWriteQueue,
            );
            return;
        }
        if self.ctx.ban_list.is_banned(&hello.peer_id) {
            self.send_error_and_drop(ErrorCode::Conf, "node is banned", DropMode::IgnoreWriteQueue);
            return;
        }

        self.node_id = Some(hello.peer_id);
        self.remote_overlay_version = Some(hello.overlay_version);
        self.remote_overlay_min_version = Some(hello.overlay_min_version);
        self.remote_version = Some(sanitize_remote_text(&hello.version_str));
        self.mac = Some(MacState::new(
            auth.sending_mac_key(&hello.cert.pubkey, &self.send_nonce, &hello.nonce, self.role),
            auth.receiving_mac_key(&hello.cert.pubkey, &self.send_nonce, &hello.nonce, self.role),
        ));
        self.state = PeerState::GotHello;
        if self.role == PeerRole::RemoteCalledUs {
            self.address = Some(PeerAddress {
                ip: self.remote_ip,
                port: hello.listening_port,
            });
        }
        tracing::debug!(
            peer = %self.id,
            node = %hello.peer_id.short(),
            version = %self.remote_version.as_deref().unwrap_or_default(),
            overlay_version = hello.overlay_version,
            "received HELLO"
        );

        // the caller is still waiting for our HELLO and cannot read an
        // ERROR before it
        let drop_mode = if self.role == PeerRole::RemoteCalledUs {
            self.send_hello();
            DropMode::FlushWriteQueue
        } else {
            DropMode::IgnoreWriteQueue
        };

        let config = Arc::clone(&self.ctx.config);
        if !versions_overlap(
            hello.overlay_min_version,
            hello.overlay_version,
            config.overlay_min_version,
            config.overlay_version,
        ) {
            self.send_error_and_drop(ErrorCode::Conf, "wrong protocol version", drop_mode);
            return;
        }
        if hello.peer_id == auth.node_id() {
            self.send_error_and_drop(ErrorCode::Conf, "connecting to self", drop_mode);
            return;
        }
        if &hello.network_id != auth.network_id() {
            self.send_error_and_drop(ErrorCode::Conf, "wrong network passphrase", drop_mode);
            return;
        }
        if hello.listening_port == 0 {
            self.send_error_and_drop(ErrorCode::Conf, "bad address", DropMode::IgnoreWriteQueue);
            return;
        }
        if !self.ctx.registry.claim_identity(self.id, &hello.peer_id) {
            let msg = format!("already-connected peer: {}", hello.peer_id.short());
            self.send_error_and_drop(ErrorCode::Conf, msg, drop_mode);
            return;
        }

        if self.role == PeerRole::WeCalledRemote {
            self.send_auth();
        }
    }

    fn recv_auth(&mut self, auth: Auth) {
        if self.state != PeerState::GotHello {
            self.send_error_and_drop(
                ErrorCode::Misc,
                "out-of-order AUTH message",
                DropMode::IgnoreWriteQueue,
            );
            return;
        }
        let Some(node_id) = self.node_id else {
            return;
        };
        self.state = PeerState::GotAuth;

        if self.role == PeerRole::RemoteCalledUs {
            self.send_auth();
            self.send_peers();
        }

        if !self.ctx.registry.accept_authenticated(self.id, &node_id) {
            self.send_error_and_drop(ErrorCode::Load, "peer rejected", DropMode::FlushWriteQueue);
            return;
        }
        self.accepted = true;
        self.ctx.metrics.pending_peers.dec();
        self.ctx.metrics.authenticated_peers.inc();

        let config = Arc::clone(&self.ctx.config);
        let remote_version = self.remote_overlay_version.unwrap_or_default();
        let bytes = config.enable_flow_control_bytes
            && config.overlay_version >= FIRST_VERSION_SUPPORTING_FLOW_CONTROL_IN_BYTES
            && remote_version >= FIRST_VERSION_SUPPORTING_FLOW_CONTROL_IN_BYTES
            && auth.flags == AUTH_MSG_FLAG_FLOW_CONTROL_BYTES_REQUESTED;
        let mode = if bytes {
            CapacityMode::Bytes
        } else {
            CapacityMode::Messages
        };
        let mut fc = FlowControl::new(mode, &config, self.ctx.flood_budget.clone());
        let grant = fc.initial_grant();
        self.flow_control = Some(fc);
        tracing::info!(
            peer = %self.id,
            node = %node_id.short(),
            flow_control = mode.as_str(),
            "peer authenticated"
        );
        if let Some(grant) = grant {
            self.send_authenticated(grant);
        }

        let low = self.ctx.consensus.min_ledger_seq_to_ask_peers();
        self.send_message(OverlayMessage::GetScpState(low));
    }

    fn recv_send_more(&mut self, grant: &OverlayMessage) {
        let Some(fc) = self.flow_control.as_mut() else {
            return;
        };
        if let Err(e) = fc.receive_grant(grant) {
            self.drop_connection(
                e.to_string(),
                DropDirection::WeDroppedRemote,
                DropMode::IgnoreWriteQueue,
            );
            return;
        }
        self.flush_flood_queue();
    }

    fn recv_peers(&mut self, peers: Vec<PeerAddress>) {
        let allow_local = self.ctx.config.allow_localhost_for_testing;
        for address in peers {
            if address.port == 0 {
                tracing::debug!(peer = %self.id, address = %address, "ignoring peer with bad port");
                continue;
            }
            if !allow_local && !is_public_ip(&address.ip) {
                tracing::trace!(peer = %self.id, address = %address, "ignoring non-public peer");
                continue;
            }
            if address.ip == self.remote_ip && address.port == self.ctx.config.peer_port {
                tracing::trace!(peer = %self.id, address = %address, "ignoring self address");
                continue;
            }
            self.ctx.registry.ensure_exists(address);
        }
    }

    fn fulfill_demand(&mut self, demand: &FloodDemand) {
        for hash in &demand.tx_hashes {
            if let Some(tx) = self.ctx.tx_pool.get(hash) {
                self.metrics.demands_fulfilled += 1;
                self.ctx.metrics.demands_fulfilled.inc();
                self.send_message(OverlayMessage::Transaction(tx));
            } else if self.ctx.tx_pool.is_banned(hash) {
                self.metrics.demands_unfulfilled_banned += 1;
                self.ctx.metrics.demands_unfulfilled_banned.inc();
            } else {
                self.metrics.demands_unfulfilled_unknown += 1;
                self.ctx.metrics.demands_unfulfilled_unknown.inc();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send `message` to the remote. Flood messages wait in the flow-control
    /// queues for outbound capacity; anything else goes straight out. While a
    /// droppable task is running, non-essential messages are shed if the
    /// write queue is backed up.
    pub fn send_message(&mut self, message: OverlayMessage) {
        if self.should_abort() {
            return;
        }
        let msg_type = message.message_type();
        if !is_shedding_exempt(msg_type)
            && self.ctx.scheduler.current_action_type() == Some(ActionType::Droppable)
            && self.send_queue_overloaded()
        {
            self.metrics.messages_dropped += 1;
            self.ctx.metrics.messages_dropped.inc();
            tracing::trace!(peer = %self.id, msg_type = %msg_type, "write queue overloaded, shedding message");
            return;
        }

        if self.ctx.flood_policy.is_flood_message(msg_type) {
            let size = message_size(&message);
            let Some(fc) = self.flow_control.as_mut() else {
                tracing::trace!(peer = %self.id, msg_type = %msg_type, "flood message before handshake, discarding");
                return;
            };
            let trimmed = fc.enqueue(message, size);
            if trimmed > 0 {
                self.metrics.messages_dropped += trimmed as u64;
                self.ctx.metrics.messages_dropped.inc_by(trimmed as u64);
            }
            self.flush_flood_queue();
        } else {
            self.send_authenticated(message);
        }
    }

    fn send_queue_overloaded(&self) -> bool {
        self.transport
            .oldest_pending_write()
            .is_some_and(|since| since.elapsed() > self.ctx.config.send_queue_overload())
    }

    fn flush_flood_queue(&mut self) {
        let Some(fc) = self.flow_control.as_mut() else {
            return;
        };
        for message in fc.take_sendable(Instant::now()) {
            self.send_authenticated(message);
        }
    }

    /// Seal (once keys exist), encode and hand one message to the transport.
    fn send_authenticated(&mut self, message: OverlayMessage) {
        let msg_type = message.message_type();
        let sealed = match self.mac.as_mut() {
            Some(mac) if !matches!(msg_type, MessageType::Hello | MessageType::Error) => {
                mac.seal(message)
            }
            _ => Ok(AuthenticatedMessage::unsealed(message)),
        };
        let payload = match sealed.and_then(|envelope| encode_envelope(&envelope)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(peer = %self.id, msg_type = %msg_type, error = %e, "failed to encode message");
                return;
            }
        };
        let frame = frame(&payload);
        self.last_write = Instant::now();
        self.metrics.messages_written += 1;
        self.metrics.bytes_written += frame.len() as u64;
        self.ctx.metrics.messages_written.inc();
        self.ctx.metrics.bytes_written.inc_by(frame.len() as u64);
        tracing::trace!(peer = %self.id, msg_type = %msg_type, bytes = frame.len(), "send");
        self.transport.send_frame(frame);
    }

    fn send_hello(&mut self) {
        let config = &self.ctx.config;
        let hello = Hello {
            overlay_version: config.overlay_version,
            overlay_min_version: config.overlay_min_version,
            network_id: *self.ctx.auth.network_id(),
            version_str: config.version_string.clone(),
            listening_port: config.peer_port,
            peer_id: self.ctx.auth.node_id(),
            cert: self.ctx.auth.auth_cert(Timestamp::now()),
            nonce: self.send_nonce,
        };
        self.send_message(OverlayMessage::Hello(hello));
    }

    fn send_auth(&mut self) {
        let flags = if self.ctx.config.enable_flow_control_bytes {
            AUTH_MSG_FLAG_FLOW_CONTROL_BYTES_REQUESTED
        } else {
            0
        };
        self.send_message(OverlayMessage::Auth(Auth { flags }));
    }

    fn send_peers(&mut self) {
        let peers = self
            .ctx
            .registry
            .peers_to_send(self.address.as_ref(), self.ctx.config.max_peers_to_send);
        self.send_message(OverlayMessage::Peers(peers));
    }

    fn send_dont_have(&mut self, msg_type: MessageType, req_hash: Hash256) {
        self.send_message(OverlayMessage::DontHave(DontHave { msg_type, req_hash }));
    }

    /// Ask the remote for `hashes`. Empty demands are not sent.
    pub fn send_tx_demand(&mut self, hashes: Vec<TxHash>) {
        for chunk in hashes.chunks(TX_DEMAND_VECTOR_MAX_SIZE) {
            self.metrics.demands_sent += 1;
            self.ctx.metrics.hashes_demanded.inc_by(chunk.len() as u64);
            self.send_message(OverlayMessage::FloodDemand(FloodDemand {
                tx_hashes: chunk.to_vec(),
            }));
        }
    }

    // -----------------------------------------------------------------------
    // Adverts
    // -----------------------------------------------------------------------

    /// Queue `hash` for the next FLOOD_ADVERT to this peer.
    pub fn queue_tx_hash_to_advertise(&mut self, hash: TxHash) {
        match self.adverts.queue_outgoing(hash) {
            OutgoingAdvert::Dropped => self.ctx.metrics.adverts_dropped.inc(),
            OutgoingAdvert::Queued { arm_timer } => {
                if arm_timer {
                    let weak = self.weak_self.clone();
                    self.advert_timer
                        .schedule(self.ctx.config.flood_advert_period(), move || {
                            if let Some(peer) = weak.upgrade() {
                                peer.lock().flush_advert();
                            }
                        });
                }
            }
            OutgoingAdvert::Flush(batch) => self.send_advert(batch),
        }
    }

    /// Send every queued advert hash now.
    pub fn flush_advert(&mut self) {
        let batch = self.adverts.take_outgoing();
        if !batch.is_empty() {
            self.send_advert(batch);
        }
    }

    fn send_advert(&mut self, tx_hashes: Vec<TxHash>) {
        self.send_message(OverlayMessage::FloodAdvert(FloodAdvert { tx_hashes }));
    }

    /// Next advertised hash awaiting a demand decision.
    pub fn pop_incoming_advert(&mut self) -> Option<TxHash> {
        self.adverts.pop_incoming()
    }

    pub fn peer_knows_hash(&self, hash: &TxHash) -> bool {
        self.adverts.seen(hash)
    }

    pub fn remember_hash(&mut self, hash: TxHash, ledger_seq: u32) {
        self.adverts.remember(hash, ledger_seq);
    }

    pub fn clear_below(&mut self, ledger_seq: u32) {
        self.adverts.clear_below(ledger_seq);
    }

    /// The node's maximum transaction size grew by `delta` bytes. Byte-mode
    /// connections widen their flood budget and tell the remote.
    pub fn handle_tx_size_increase(&mut self, delta: u64) {
        if delta == 0 || self.should_abort() {
            return;
        }
        let grant = match self.flow_control.as_mut() {
            Some(fc) if fc.mode() == CapacityMode::Bytes => fc.handle_tx_size_increase(delta),
            _ => return,
        };
        if let Some(grant) = grant {
            self.send_authenticated(grant);
        }
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    fn start_recurrent_timer(&mut self) {
        let weak = self.weak_self.clone();
        self.recurrent_timer
            .schedule(self.ctx.config.recurrent_timer_period(), move || {
                if let Some(peer) = weak.upgrade() {
                    peer.lock().recurrent_timer_expired();
                }
            });
    }

    fn recurrent_timer_expired(&mut self) {
        if self.should_abort() {
            return;
        }
        let config = Arc::clone(&self.ctx.config);
        let io_timeout = if self.is_authenticated() {
            config.peer_timeout()
        } else {
            config.authentication_timeout()
        };

        if self.last_read.elapsed() >= io_timeout && self.last_write.elapsed() >= io_timeout {
            self.ctx.metrics.idle_timeouts.inc();
            self.drop_connection(
                "idle timeout",
                DropDirection::WeDroppedRemote,
                DropMode::IgnoreWriteQueue,
            );
            return;
        }
        let starved = self
            .flow_control
            .as_ref()
            .and_then(FlowControl::no_outbound_capacity_since)
            .is_some_and(|since| since.elapsed() >= config.no_flood_capacity_timeout());
        if starved {
            self.ctx.metrics.no_flood_capacity_timeouts.inc();
            self.drop_connection(
                "idle timeout (no new flood requests)",
                DropDirection::WeDroppedRemote,
                DropMode::IgnoreWriteQueue,
            );
            return;
        }
        let straggling = self
            .transport
            .oldest_pending_write()
            .is_some_and(|since| since.elapsed() >= config.straggler_timeout());
        if straggling {
            self.ctx.metrics.straggler_timeouts.inc();
            self.drop_connection(
                "straggling (cannot keep up)",
                DropDirection::WeDroppedRemote,
                DropMode::IgnoreWriteQueue,
            );
            return;
        }

        if let Some(grant) = self
            .flow_control
            .as_mut()
            .and_then(FlowControl::retry_withheld_grant)
        {
            self.send_authenticated(grant);
        }
        self.ping_peer();
        self.start_recurrent_timer();
    }

    /// Measure latency with a GET_SCP_QUORUMSET for a hash nobody has; the
    /// DONT_HAVE (or, unexpectedly, the set) closes the round trip.
    fn ping_peer(&mut self) {
        if !self.is_authenticated() || self.ping.is_some() {
            return;
        }
        let sent = Instant::now();
        let nanos = sent.duration_since(self.created_at).as_nanos();
        let hash = Hash256::new(sha256(&nanos.to_le_bytes()));
        self.ping = Some((hash, sent));
        self.send_message(OverlayMessage::GetScpQuorumSet(hash));
    }

    fn maybe_process_ping_response(&mut self, hash: &Hash256) {
        match self.ping {
            Some((ping_hash, sent)) if &ping_hash == hash => {
                let latency = sent.elapsed();
                self.ping = None;
                self.last_ping = Some(latency);
                self.ctx
                    .metrics
                    .ping_latency_ms
                    .observe(latency.as_secs_f64() * 1_000.0);
                tracing::trace!(peer = %self.id, latency_ms = latency.as_millis() as u64, "ping");
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn diagnostics(&self) -> PeerDiagnostics {
        PeerDiagnostics {
            connection_id: self.id.0,
            address: self
                .address
                .map(|a| a.to_string())
                .unwrap_or_else(|| self.remote_ip.to_string()),
            node_id: self.node_id.map(|n| n.to_string()),
            role: self.role,
            state: self.state,
            remote_version: self.remote_version.clone(),
            remote_overlay_version: self.remote_overlay_version,
            remote_overlay_min_version: self.remote_overlay_min_version,
            connected_for: self.created_at.elapsed(),
            latency: self.last_ping,
            flow_control: self.flow_control.as_ref().map(FlowControl::snapshot),
            adverts: self.adverts.counters().clone(),
            metrics: self.metrics.clone(),
            dropped: self.drop_direction,
        }
    }
}

/// Holds the capacity charge of a message posted to the main queue. The
/// task hands it back with [`finish`](Self::finish); if the task is dropped
/// unrun the charge is returned by a follow-up task instead, since the drop
/// may happen while the peer is locked.
struct CapacityGuard {
    peer: Weak<Mutex<Peer>>,
    charge: Option<MessageCharge>,
    scheduler: Scheduler,
}

impl CapacityGuard {
    fn finish(mut self, peer: &mut Peer) {
        if let Some(charge) = self.charge.take() {
            peer.end_message_processing(charge);
        }
    }
}

impl Drop for CapacityGuard {
    fn drop(&mut self) {
        let Some(charge) = self.charge.take() else {
            return;
        };
        let weak = self.peer.clone();
        self.scheduler
            .post("release capacity", ActionType::Normal, move || {
                if let Some(peer) = weak.upgrade() {
                    peer.lock().end_message_processing(charge);
                }
            });
    }
}

fn category_task_name(category: MessageCategory) -> &'static str {
    match category {
        MessageCategory::Handshake => "recv handshake",
        MessageCategory::Control => "recv control",
        MessageCategory::TransactionFlood => "recv flood",
        MessageCategory::ConsensusQuery => "recv consensus query",
        MessageCategory::Consensus => "recv consensus",
    }
}

fn is_public_ip(ip: &std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_link_local()
                || v4.is_broadcast())
        }
        std::net::IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

/// Printable prefix of remote-supplied text.
fn sanitize_remote_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(MAX_REMOTE_ERROR_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn private_and_loopback_addresses_are_not_public() {
        assert!(!is_public_ip(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(!is_public_ip(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!is_public_ip(&IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert!(is_public_ip(&IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn remote_text_is_trimmed_to_printable() {
        assert_eq!(sanitize_remote_text("bad\n\u{7}peer"), "badpeer");
        assert_eq!(sanitize_remote_text(&"x".repeat(1000)).len(), MAX_REMOTE_ERROR_LEN);
    }

    #[test]
    fn states_order_by_handshake_progress() {
        assert!(PeerState::Connecting < PeerState::GotHello);
        assert!(PeerState::GotHello < PeerState::GotAuth);
        assert!(PeerState::GotAuth < PeerState::Closing);
    }
}
