//! Validator overlay core.
//!
//! Per-connection state machine (handshake, MAC, flow control, adverts),
//! the main-queue scheduler that processes inbound messages, and the
//! traits through which the overlay reaches the rest of the node.

pub mod advert;
pub mod auth;
pub mod cache;
pub mod capacity;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flood_budget;
pub mod flow_control;
pub mod mac;
pub mod metrics;
pub mod overlay;
pub mod peer;
pub mod scheduler;
pub mod timer;
pub mod transport;

pub use auth::{AuthError, PeerAuth, PeerRole};
pub use capacity::CapacityMode;
pub use config::OverlayConfig;
pub use dispatch::{ActionType, MessageCategory};
pub use error::NetworkError;
pub use flood_budget::SharedFloodBudget;
pub use flow_control::{FlowControl, FlowControlError};
pub use mac::{MacError, MacState};
pub use metrics::{OverlayMetrics, PeerDiagnostics, PeerMetrics};
pub use overlay::{
    BanList, ConnectionId, Consensus, DefaultFloodPolicy, FloodPolicy, OverlayContext,
    PeerRegistry, TxPool, TxReceiveOutcome,
};
pub use peer::{DropDirection, Peer, PeerHandle, PeerState};
pub use scheduler::{main_queue, Scheduler, SchedulerWorker};
pub use transport::{DropMode, PeerTransport};
