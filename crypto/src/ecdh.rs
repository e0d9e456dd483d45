//! X25519 key agreement for per-connection MAC keys.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Long-lived local X25519 secret whose public half is certified in HELLO.
pub struct EcdhSecret {
    secret: StaticSecret,
    public: [u8; 32],
}

impl EcdhSecret {
    /// Generate a fresh secret from the OS RNG.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild from raw scalar bytes (tests and deterministic setups).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = X25519Public::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Raw shared secret with `remote_public`.
    pub fn diffie_hellman(&self, remote_public: &[u8; 32]) -> [u8; 32] {
        self.secret
            .diffie_hellman(&X25519Public::from(*remote_public))
            .to_bytes()
    }
}
