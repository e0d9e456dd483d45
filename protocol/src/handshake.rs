//! Byte layouts signed or MAC'd during and after the handshake.

use peerlink_crypto::sha256_multi;
use peerlink_messages::OverlayMessage;
use peerlink_types::NetworkId;

use crate::codec;
use crate::ProtocolError;

/// Envelope tag mixed into the certificate digest so a cert signature can
/// never be replayed as a signature over some other structure.
pub const ENVELOPE_TYPE_AUTH: u32 = 3;

/// Digest signed by a node to certify its ephemeral X25519 key.
pub fn auth_cert_digest(network_id: &NetworkId, expiration: u64, pubkey: &[u8; 32]) -> [u8; 32] {
    sha256_multi(&[
        network_id.as_bytes(),
        &ENVELOPE_TYPE_AUTH.to_be_bytes(),
        &expiration.to_be_bytes(),
        pubkey,
    ])
}

/// Bytes covered by the MAC of an authenticated message.
pub fn mac_payload(sequence: u64, message: &OverlayMessage) -> Result<Vec<u8>, ProtocolError> {
    codec::encode_payload(&(sequence, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_binds_every_field() {
        let net = NetworkId([1u8; 32]);
        let base = auth_cert_digest(&net, 100, &[2u8; 32]);
        assert_ne!(base, auth_cert_digest(&NetworkId([9u8; 32]), 100, &[2u8; 32]));
        assert_ne!(base, auth_cert_digest(&net, 101, &[2u8; 32]));
        assert_ne!(base, auth_cert_digest(&net, 100, &[3u8; 32]));
    }

    #[test]
    fn mac_payload_depends_on_sequence() {
        let a = mac_payload(0, &OverlayMessage::GetPeers).unwrap();
        let b = mac_payload(1, &OverlayMessage::GetPeers).unwrap();
        assert_ne!(a, b);
    }
}
