//! Fundamental types for the peerlink overlay.
//!
//! This crate defines the values shared across every other crate in the
//! workspace: node keys and signatures, 32-byte hashes and nonces, the
//! network identifier, and wall-clock timestamps.

pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod nonce;
pub mod time;

pub use error::TypesError;
pub use hash::{Hash256, TxHash};
pub use keys::{KeyPair, NodeId, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use nonce::Nonce;
pub use time::Timestamp;
