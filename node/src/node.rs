//! The peerlink node: binds the listener, wires peers to TCP, and runs the
//! overlay's background loops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use peerlink_messages::{PeerAddress, TransactionEnvelope};
use peerlink_network::{
    main_queue, DefaultFloodPolicy, OverlayContext, Peer, PeerAuth, PeerDiagnostics, PeerRole,
    SchedulerWorker, SharedFloodBudget,
};
use peerlink_types::{NodeId, TxHash};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::ledger::LedgerClock;
use crate::metrics::NodeMetrics;
use crate::overlay_manager::{OverlayLimits, OverlayManager};
use crate::shutdown::ShutdownController;
use crate::tcp_transport::TcpTransport;
use crate::tracing_spans::{connection_span, demand_pass_span, dial_span};
use crate::tx_pool::MemoryTxPool;

/// How long [`PeerlinkNode::stop`] waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the dialer tops up outbound connections.
const DIAL_INTERVAL: Duration = Duration::from_secs(5);

/// Outbound TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Interval of the metrics snapshot when `enable_metrics` is set.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Ledger the stand-in clock starts at.
const GENESIS_LEDGER_SEQ: u32 = 1;

pub struct PeerlinkNode {
    config: NodeConfig,
    ctx: OverlayContext,
    overlay: Arc<OverlayManager>,
    tx_pool: Arc<MemoryTxPool>,
    ledger: Arc<LedgerClock>,
    metrics: Arc<NodeMetrics>,
    shutdown: ShutdownController,
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    worker: Option<SchedulerWorker>,
    relay_rx: Option<mpsc::UnboundedReceiver<TxHash>>,
    task_handles: Vec<JoinHandle<()>>,
}

impl PeerlinkNode {
    /// Validate `config`, bind the listener and assemble the overlay. Nothing
    /// runs until [`start`](Self::start). A `peer_port` of 0 binds an
    /// ephemeral port, which is then advertised in HELLO.
    pub async fn new(mut config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let known_peers = config
            .known_peers
            .iter()
            .map(|s| parse_peer_address(s))
            .collect::<Result<Vec<_>, _>>()?;

        let bind_addr = format!("{}:{}", config.listen_address, config.overlay.peer_port);
        let listener = TcpListener::bind(&bind_addr).await?;
        let local_addr = listener.local_addr()?;
        config.overlay.peer_port = local_addr.port();

        let keypair = config.node_keypair()?;
        let metrics = Arc::new(NodeMetrics::new());
        let shutdown = ShutdownController::new();
        let (pool, relay_rx) = MemoryTxPool::new(config.tx_pool_capacity, config.overlay.max_tx_size_bytes);
        let tx_pool = Arc::new(pool);
        let ledger = Arc::new(LedgerClock::new(GENESIS_LEDGER_SEQ));
        let overlay = Arc::new(OverlayManager::new(
            OverlayLimits {
                max_inbound: config.max_inbound_connections,
                target_outbound: config.target_outbound_connections,
                max_authenticated: config.max_authenticated_peers,
                max_demand_batch: config.max_demand_batch,
            },
            shutdown.clone(),
            Arc::clone(&tx_pool),
            Arc::clone(&metrics),
        ));
        overlay.set_local_address(PeerAddress {
            ip: local_addr.ip(),
            port: local_addr.port(),
        });
        for address in known_peers {
            overlay.add_known_address(address);
        }

        let auth = PeerAuth::new(
            config.network_id(),
            keypair,
            config.overlay.auth_cert_lifetime_secs,
        );
        let (scheduler, worker) = main_queue(config.overlay.scheduler_latency_window());
        let flood_budget = config
            .overlay
            .aggregate_flood_bytes_budget
            .map(|limit| Arc::new(SharedFloodBudget::new(limit)));
        let ctx = OverlayContext {
            config: Arc::new(config.overlay.clone()),
            auth: Arc::new(auth),
            registry: overlay.clone(),
            ban_list: overlay.clone(),
            tx_pool: tx_pool.clone(),
            consensus: ledger.clone(),
            flood_policy: Arc::new(DefaultFloodPolicy),
            scheduler,
            metrics: Arc::clone(&metrics.overlay),
            flood_budget,
        };

        tracing::info!(
            node = %ctx.auth.node_id(),
            listen = %local_addr,
            "peerlink node initialized"
        );

        Ok(Self {
            config,
            ctx,
            overlay,
            tx_pool,
            ledger,
            metrics,
            shutdown,
            local_addr,
            listener: Some(listener),
            worker: Some(worker),
            relay_rx: Some(relay_rx),
            task_handles: Vec::new(),
        })
    }

    /// Spawn the main queue, the listener, the dialer and the periodic
    /// ticks.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let (Some(listener), Some(worker), Some(relay_rx)) = (
            self.listener.take(),
            self.worker.take(),
            self.relay_rx.take(),
        ) else {
            return Err(NodeError::Config("node already started".into()));
        };
        tracing::info!(listen = %self.local_addr, "peerlink node starting");

        // ── Main queue ────────────────────────────────────────────────────
        self.task_handles
            .push(tokio::spawn(worker.run(self.shutdown.subscribe())));

        // ── Listener ──────────────────────────────────────────────────────
        {
            let ctx = self.ctx.clone();
            let overlay = Arc::clone(&self.overlay);
            let metrics = Arc::clone(&self.metrics);
            let shutdown = self.shutdown.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => {
                            tracing::info!("listener shutting down");
                            break;
                        }
                        result = listener.accept() => match result {
                            Ok((stream, remote)) => {
                                if !overlay.can_accept_inbound() {
                                    metrics.connections_rejected.inc();
                                    tracing::debug!(remote = %remote, "inbound slots full");
                                    continue;
                                }
                                metrics.connections_accepted.inc();
                                attach_inbound(&ctx, &overlay, &shutdown, stream, remote);
                            }
                            Err(e) => tracing::warn!(error = %e, "accept failed"),
                        },
                    }
                }
            }));
        }

        // ── Dialer ────────────────────────────────────────────────────────
        {
            let ctx = self.ctx.clone();
            let overlay = Arc::clone(&self.overlay);
            let metrics = Arc::clone(&self.metrics);
            let shutdown = self.shutdown.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(DIAL_INTERVAL);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = interval.tick() => {
                            for address in overlay.dial_candidates() {
                                let ctx = ctx.clone();
                                let overlay = Arc::clone(&overlay);
                                let metrics = Arc::clone(&metrics);
                                let shutdown = shutdown.clone();
                                let span = dial_span(&address.to_string());
                                tokio::spawn(
                                    dial(ctx, overlay, metrics, shutdown, address).instrument(span),
                                );
                            }
                        }
                    }
                }
            }));
        }

        // ── Demand pass ───────────────────────────────────────────────────
        {
            let overlay = Arc::clone(&self.overlay);
            let period = Duration::from_millis(self.config.demand_period_ms);
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = interval.tick() => {
                            let _span = demand_pass_span(overlay.authenticated_count()).entered();
                            let demanded = overlay.demand_pass();
                            if demanded > 0 {
                                tracing::debug!(demanded, "demand pass");
                            }
                        }
                    }
                }
            }));
        }

        // ── Ledger clock ──────────────────────────────────────────────────
        {
            let overlay = Arc::clone(&self.overlay);
            let ledger = Arc::clone(&self.ledger);
            let metrics = Arc::clone(&self.metrics);
            let period = Duration::from_secs(self.config.ledger_close_secs);
            let history = self.config.advert_history_ledgers;
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // the first tick completes immediately
                interval.tick().await;
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = interval.tick() => {
                            let seq = ledger.advance();
                            metrics.ledger_seq.set(i64::from(seq));
                            overlay.clear_below(seq.saturating_sub(history));
                            tracing::trace!(seq, "ledger closed");
                        }
                    }
                }
            }));
        }

        // ── Transaction relay ─────────────────────────────────────────────
        {
            let overlay = Arc::clone(&self.overlay);
            let tx_pool = Arc::clone(&self.tx_pool);
            let metrics = Arc::clone(&self.metrics);
            let mut relay_rx = relay_rx;
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        hash = relay_rx.recv() => {
                            let Some(hash) = hash else { break };
                            metrics.tx_pool_size.set(tx_pool.len() as i64);
                            overlay.advertise(hash);
                        }
                    }
                }
            }));
        }

        // ── Metrics snapshot ──────────────────────────────────────────────
        if self.config.enable_metrics {
            let overlay = Arc::clone(&self.overlay);
            let metrics = Arc::clone(&self.metrics);
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(METRICS_LOG_INTERVAL);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = interval.tick() => {
                            tracing::info!(
                                peers = overlay.peer_count(),
                                authenticated = overlay.authenticated_count(),
                                tx_pool = metrics.tx_pool_size.get(),
                                "overlay status"
                            );
                            tracing::debug!(metrics = %metrics.encode_text(), "metrics snapshot");
                            match overlay.diagnostics_json() {
                                Ok(peers) => tracing::debug!(peers = %peers, "peer diagnostics"),
                                Err(e) => tracing::warn!(error = %e, "failed to encode diagnostics"),
                            }
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    /// Signal shutdown, drop every peer and wait for the background tasks.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("peerlink node stopping");
        self.shutdown.shutdown();
        self.overlay.drop_all("node shutting down");

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "background tasks did not stop in time");
            return Err(NodeError::ShutdownTimeout);
        }

        tracing::info!("peerlink node stopped");
        Ok(())
    }

    // ── Operations ────────────────────────────────────────────────────────

    /// Submit a transaction from this node. Returns its hash when it was new.
    pub fn broadcast_transaction(&self, tx: TransactionEnvelope) -> Option<TxHash> {
        self.overlay.broadcast_transaction(tx)
    }

    /// Dial `address` now, outside the dialer's schedule.
    pub fn connect_to(&self, address: PeerAddress) -> Result<(), NodeError> {
        if self.worker.is_some() {
            return Err(NodeError::NotStarted);
        }
        let span = dial_span(&address.to_string());
        tokio::spawn(
            dial(
                self.ctx.clone(),
                Arc::clone(&self.overlay),
                Arc::clone(&self.metrics),
                self.shutdown.clone(),
                address,
            )
            .instrument(span),
        );
        Ok(())
    }

    pub fn ban(&self, node_id: NodeId) {
        self.overlay.ban(node_id);
    }

    /// The largest transaction the node accepts grew by `delta` bytes.
    pub fn handle_tx_size_increase(&self, delta: u64) {
        self.overlay.handle_tx_size_increase(delta);
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn node_id(&self) -> NodeId {
        self.ctx.auth.node_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub fn ledger(&self) -> &Arc<LedgerClock> {
        &self.ledger
    }

    pub fn tx_pool(&self) -> &Arc<MemoryTxPool> {
        &self.tx_pool
    }

    pub fn authenticated_peer_count(&self) -> usize {
        self.overlay.authenticated_count()
    }

    pub fn peer_diagnostics(&self) -> Vec<PeerDiagnostics> {
        self.overlay.diagnostics()
    }
}

/// Wrap an accepted socket in a peer and start reading from it.
fn attach_inbound(
    ctx: &OverlayContext,
    overlay: &Arc<OverlayManager>,
    shutdown: &ShutdownController,
    stream: TcpStream,
    remote: SocketAddr,
) {
    let id = overlay.next_connection_id();
    let _span = connection_span(id, remote, true).entered();
    let (transport, reader) = TcpTransport::new(stream, remote.ip());
    let peer = Peer::new_inbound(id, ctx.clone(), transport);
    overlay.add_peer(Arc::clone(&peer), PeerRole::RemoteCalledUs, None);
    reader.spawn(&peer, shutdown.subscribe());
    tracing::debug!("inbound connection");
}

/// Open an outbound connection to `address` and start the handshake.
async fn dial(
    ctx: OverlayContext,
    overlay: Arc<OverlayManager>,
    metrics: Arc<NodeMetrics>,
    shutdown: ShutdownController,
    address: PeerAddress,
) {
    let target = SocketAddr::new(address.ip, address.port);
    let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            metrics.dial_failures.inc();
            tracing::debug!(error = %e, "dial failed");
            return;
        }
        Err(_) => {
            metrics.dial_failures.inc();
            tracing::debug!("dial timed out");
            return;
        }
    };

    let id = overlay.next_connection_id();
    let _span = connection_span(id, target, false).entered();
    let (transport, reader) = TcpTransport::new(stream, address.ip);
    let peer = Peer::new_outbound(id, ctx, transport, address);
    overlay.add_peer(Arc::clone(&peer), PeerRole::WeCalledRemote, Some(address));
    reader.spawn(&peer, shutdown.subscribe());
    peer.lock().connected();
    tracing::debug!("outbound connection");
}

/// Parse "ip:port" from configuration.
pub fn parse_peer_address(s: &str) -> Result<PeerAddress, NodeError> {
    let addr: SocketAddr = s
        .trim()
        .parse()
        .map_err(|_| NodeError::BadAddress(s.to_string()))?;
    if addr.port() == 0 {
        return Err(NodeError::BadAddress(s.to_string()));
    }
    Ok(PeerAddress {
        ip: addr.ip(),
        port: addr.port(),
    })
}
