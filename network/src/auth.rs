//! Handshake credentials: authentication certificates and MAC key
//! derivation.
//!
//! Each node holds one X25519 secret for its lifetime and periodically
//! re-certifies the public half with its Ed25519 identity. During HELLO the
//! two certified keys are combined with both nonces into one MAC key per
//! direction, arranged so that our sending key is the remote's receiving key.

use parking_lot::Mutex;
use peerlink_crypto::{hkdf_expand, hkdf_extract, sign_message, verify_signature, EcdhSecret, MacKey};
use peerlink_messages::AuthCert;
use peerlink_protocol::handshake::auth_cert_digest;
use peerlink_types::{KeyPair, NetworkId, NodeId, Nonce, Timestamp};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("auth cert expired at {expiration}, now {now}")]
    Expired { expiration: u64, now: u64 },

    #[error("auth cert signature invalid")]
    BadSignature,
}

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum PeerRole {
    WeCalledRemote,
    RemoteCalledUs,
}

/// Local node credentials shared by every connection.
pub struct PeerAuth {
    network_id: NetworkId,
    node_key: KeyPair,
    ecdh: EcdhSecret,
    cert_lifetime_secs: u64,
    cert: Mutex<Option<AuthCert>>,
}

impl PeerAuth {
    pub fn new(network_id: NetworkId, node_key: KeyPair, cert_lifetime_secs: u64) -> Self {
        Self {
            network_id,
            node_key,
            ecdh: EcdhSecret::generate(),
            cert_lifetime_secs,
            cert: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_key.public
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    /// Current certificate, re-issued once less than half its lifetime remains.
    pub fn auth_cert(&self, now: Timestamp) -> AuthCert {
        let mut cert = self.cert.lock();
        let refresh_after = now.plus_secs(self.cert_lifetime_secs / 2).as_secs();
        match cert.as_ref() {
            Some(current) if current.expiration >= refresh_after => current.clone(),
            _ => {
                let fresh = self.issue_cert(now.plus_secs(self.cert_lifetime_secs).as_secs());
                *cert = Some(fresh.clone());
                fresh
            }
        }
    }

    fn issue_cert(&self, expiration: u64) -> AuthCert {
        let pubkey = *self.ecdh.public_key();
        let digest = auth_cert_digest(&self.network_id, expiration, &pubkey);
        tracing::debug!(expiration, "issued auth cert");
        AuthCert {
            pubkey,
            expiration,
            sig: sign_message(&digest, &self.node_key.private),
        }
    }

    /// Check that `cert` is current and signed by `remote`.
    pub fn verify_remote_auth_cert(
        &self,
        now: Timestamp,
        remote: &NodeId,
        cert: &AuthCert,
    ) -> Result<(), AuthError> {
        if cert.expiration < now.as_secs() {
            return Err(AuthError::Expired {
                expiration: cert.expiration,
                now: now.as_secs(),
            });
        }
        let digest = auth_cert_digest(&self.network_id, cert.expiration, &cert.pubkey);
        if !verify_signature(&digest, &cert.sig, remote) {
            return Err(AuthError::BadSignature);
        }
        Ok(())
    }

    /// Key for MACs we attach to outgoing messages.
    pub fn sending_mac_key(
        &self,
        remote_pubkey: &[u8; 32],
        local_nonce: &Nonce,
        remote_nonce: &Nonce,
        role: PeerRole,
    ) -> MacKey {
        let prefix = match role {
            PeerRole::WeCalledRemote => 0u8,
            PeerRole::RemoteCalledUs => 1u8,
        };
        let shared = self.shared_key(remote_pubkey, role);
        hkdf_expand(&shared, &expand_info(prefix, local_nonce, remote_nonce))
    }

    /// Key for MACs we expect on incoming messages.
    pub fn receiving_mac_key(
        &self,
        remote_pubkey: &[u8; 32],
        local_nonce: &Nonce,
        remote_nonce: &Nonce,
        role: PeerRole,
    ) -> MacKey {
        let prefix = match role {
            PeerRole::WeCalledRemote => 1u8,
            PeerRole::RemoteCalledUs => 0u8,
        };
        let shared = self.shared_key(remote_pubkey, role);
        hkdf_expand(&shared, &expand_info(prefix, remote_nonce, local_nonce))
    }

    // ecdh || initiator pubkey || acceptor pubkey
    fn shared_key(&self, remote_pubkey: &[u8; 32], role: PeerRole) -> MacKey {
        let local_pubkey = self.ecdh.public_key();
        let (initiator, acceptor) = match role {
            PeerRole::WeCalledRemote => (local_pubkey, remote_pubkey),
            PeerRole::RemoteCalledUs => (remote_pubkey, local_pubkey),
        };
        let mut material = Vec::with_capacity(96);
        material.extend_from_slice(&self.ecdh.diffie_hellman(remote_pubkey));
        material.extend_from_slice(initiator);
        material.extend_from_slice(acceptor);
        hkdf_extract(&material)
    }
}

fn expand_info(prefix: u8, first: &Nonce, second: &Nonce) -> Vec<u8> {
    let mut info = Vec::with_capacity(65);
    info.push(prefix);
    info.extend_from_slice(first.as_bytes());
    info.extend_from_slice(second.as_bytes());
    info
}
