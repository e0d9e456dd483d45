//! Network identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which overlay network a node belongs to.
///
/// Derived from the network passphrase (see
/// `peerlink_crypto::network_id_from_passphrase`). Peers on different
/// networks refuse each other during HELLO.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub [u8; 32]);

impl NetworkId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkId({})", hex::encode(&self.0[..4]))
    }
}
