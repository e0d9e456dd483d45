//! Cryptographic primitives for the peerlink overlay.
//!
//! - **Ed25519** for node identity and authentication certificates
//! - **X25519** for the per-connection key agreement
//! - **HMAC-SHA256** and HKDF for MAC key derivation and message sealing
//! - **SHA-256** for certificate digests and network ids, **Blake2b** for
//!   transaction identifiers

pub mod ecdh;
pub mod hash;
pub mod keys;
pub mod mac;
pub mod sign;

pub use ecdh::EcdhSecret;
pub use hash::{blake2b_256, hash_transaction, network_id_from_passphrase, sha256, sha256_multi};
pub use keys::{generate_keypair, keypair_from_seed, public_from_private};
pub use mac::{hkdf_expand, hkdf_extract, hmac_sha256, hmac_sha256_verify, MacKey};
pub use sign::{sign_message, verify_signature};
