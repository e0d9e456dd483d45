//! Per-connection message authentication.
//!
//! After HELLO both directions carry a sequence number and an HMAC-SHA256
//! over `(sequence, message)`. The receive side compares the sequence
//! before the MAC and advances its counter even when either check fails,
//! so a rejected replay can never leave the counter where a later replay
//! would match.

use peerlink_crypto::{hmac_sha256, hmac_sha256_verify, MacKey};
use peerlink_messages::{AuthenticatedMessage, OverlayMessage};
use peerlink_protocol::handshake::mac_payload;
use peerlink_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MacError {
    #[error("unexpected auth sequence: expected {expected}, got {actual}")]
    UnexpectedSequence { expected: u64, actual: u64 },

    #[error("unexpected MAC")]
    BadMac,

    #[error("could not encode MAC payload")]
    Encoding,
}

/// Directional keys and counters of one authenticated connection.
pub struct MacState {
    send_key: MacKey,
    recv_key: MacKey,
    send_sequence: u64,
    recv_sequence: u64,
}

impl MacState {
    pub fn new(send_key: MacKey, recv_key: MacKey) -> Self {
        Self {
            send_key,
            recv_key,
            send_sequence: 0,
            recv_sequence: 0,
        }
    }

    /// Wrap `message` with the next send sequence and its MAC.
    pub fn seal(&mut self, message: OverlayMessage) -> Result<AuthenticatedMessage, ProtocolError> {
        let sequence = self.send_sequence;
        let mac = hmac_sha256(&self.send_key, &mac_payload(sequence, &message)?);
        self.send_sequence += 1;
        Ok(AuthenticatedMessage {
            sequence,
            mac,
            message,
        })
    }

    /// Check an inbound envelope against the expected sequence and MAC.
    pub fn open(&mut self, envelope: &AuthenticatedMessage) -> Result<(), MacError> {
        let expected = self.recv_sequence;
        self.recv_sequence += 1;
        if envelope.sequence != expected {
            return Err(MacError::UnexpectedSequence {
                expected,
                actual: envelope.sequence,
            });
        }
        let payload =
            mac_payload(envelope.sequence, &envelope.message).map_err(|_| MacError::Encoding)?;
        if !hmac_sha256_verify(&self.recv_key, &payload, &envelope.mac) {
            return Err(MacError::BadMac);
        }
        Ok(())
    }

    pub fn send_sequence(&self) -> u64 {
        self.send_sequence
    }

    pub fn recv_sequence(&self) -> u64 {
        self.recv_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_messages::SendMore;

    fn pair() -> (MacState, MacState) {
        let a_to_b = MacKey([1u8; 32]);
        let b_to_a = MacKey([2u8; 32]);
        (
            MacState::new(a_to_b.clone(), b_to_a.clone()),
            MacState::new(b_to_a, a_to_b),
        )
    }

    #[test]
    fn sequences_increase_by_one_per_message() {
        let (mut a, mut b) = pair();
        for expected in 0..5u64 {
            let env = a.seal(OverlayMessage::GetPeers).unwrap();
            assert_eq!(env.sequence, expected);
            b.open(&env).unwrap();
        }
        assert_eq!(a.send_sequence(), 5);
        assert_eq!(b.recv_sequence(), 5);
    }

    #[test]
    fn replay_rejected_and_counter_still_advances() {
        let (mut a, mut b) = pair();
        let first = a.seal(OverlayMessage::GetPeers).unwrap();
        b.open(&first).unwrap();
        assert_eq!(
            b.open(&first),
            Err(MacError::UnexpectedSequence {
                expected: 1,
                actual: 0
            })
        );
        assert_eq!(b.recv_sequence(), 2);
    }

    #[test]
    fn tampered_payload_rejected() {
        let (mut a, mut b) = pair();
        let mut env = a
            .seal(OverlayMessage::SendMore(SendMore { num_messages: 1 }))
            .unwrap();
        env.message = OverlayMessage::SendMore(SendMore { num_messages: 1000 });
        assert_eq!(b.open(&env), Err(MacError::BadMac));
        assert_eq!(b.recv_sequence(), 1);
    }

    #[test]
    fn wrong_direction_key_rejected() {
        let (mut a, _) = pair();
        let (mut other_a, _) = pair();
        let env = a.seal(OverlayMessage::GetPeers).unwrap();
        // other_a receives with the b->a key
        assert_eq!(other_a.open(&env), Err(MacError::BadMac));
    }
}
