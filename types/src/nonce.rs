//! Handshake nonces.

use serde::{Deserialize, Serialize};

/// A 32-byte random value each side contributes to MAC key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Nonce(pub [u8; 32]);

impl Nonce {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
