//! Nullable infrastructure for deterministic overlay testing.
//!
//! Everything a peer talks to (socket, address book, ban list, transaction
//! pool, consensus) sits behind a trait in `peerlink-network`. This crate
//! provides in-memory implementations that:
//! - Record what the peer did, for assertions
//! - Can be steered programmatically
//! - Never touch the network
//!
//! [`LoopbackPair`] wires two nodes back to back and moves frames between
//! them on demand.

pub mod consensus;
pub mod loopback;
pub mod registry;
pub mod transport;
pub mod tx_pool;

pub use consensus::NullConsensus;
pub use loopback::{LoopbackPair, TestNode, TEST_PASSPHRASE};
pub use registry::{NullBanList, NullRegistry};
pub use transport::NullTransport;
pub use tx_pool::NullTxPool;
