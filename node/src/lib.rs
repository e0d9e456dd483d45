//! peerlink node: the validator overlay running over TCP.
//!
//! The node owns:
//! - The listener and the outbound dialer
//! - The registry of every connection (identity claims, authenticated set,
//!   address book, bans)
//! - The transaction pool and the advert/demand loop over it
//! - A stand-in ledger clock that paces advert history
//! - Logging, metrics and graceful shutdown

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod overlay_manager;
pub mod shutdown;
pub mod tcp_transport;
pub mod tracing_spans;
pub mod tx_pool;

pub use config::NodeConfig;
pub use error::NodeError;
pub use ledger::LedgerClock;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::{parse_peer_address, PeerlinkNode};
pub use overlay_manager::{OverlayLimits, OverlayManager};
pub use shutdown::ShutdownController;
pub use tcp_transport::{TcpReader, TcpTransport};
pub use tx_pool::MemoryTxPool;
