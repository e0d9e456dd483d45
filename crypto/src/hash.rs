//! SHA-256 and Blake2b hashing.

use blake2::digest::consts::U32;
use blake2::Blake2b;
use peerlink_types::{NetworkId, TxHash};
use sha2::{Digest, Sha256};

type Blake2b256 = Blake2b<U32>;

/// SHA-256 of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 over several slices in sequence (avoids concatenation allocation).
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// 256-bit Blake2b of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Identifier of a transaction envelope, used by adverts and demands.
pub fn hash_transaction(envelope_bytes: &[u8]) -> TxHash {
    TxHash::new(blake2b_256(envelope_bytes))
}

/// Network id is the SHA-256 of the network passphrase.
pub fn network_id_from_passphrase(passphrase: &str) -> NetworkId {
    NetworkId(sha256(passphrase.as_bytes()))
}
