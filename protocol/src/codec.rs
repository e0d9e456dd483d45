//! Message codec: length-prefixed framing and bincode payloads.
//!
//! A frame is a 4-byte big-endian length followed by that many payload
//! bytes. The payload of every overlay frame is a bincode-encoded
//! [`AuthenticatedMessage`].

use bincode::Options;
use peerlink_messages::{AuthenticatedMessage, OverlayMessage, TransactionEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ProtocolError;

/// Maximum frame payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_SIZE as u64)
}

/// Serialize a value without a frame header.
pub fn encode_payload(value: &impl Serialize) -> Result<Vec<u8>, ProtocolError> {
    options()
        .serialize(value)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Deserialize a value from an unframed payload. Trailing bytes are rejected.
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    options()
        .reject_trailing_bytes()
        .deserialize(data)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serialize a value and prepend the 4-byte length header.
pub fn encode(value: &impl Serialize) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(value)?;
    Ok(frame(&payload))
}

/// Prepend the length header to an already-encoded payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validate a frame header and return the payload length it announces.
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(len)
}

/// Decode one frame from the front of `data`, returning the value and the
/// number of bytes consumed.
pub fn decode_framed<T: DeserializeOwned>(data: &[u8]) -> Result<(T, usize), ProtocolError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::Incomplete {
            needed: FRAME_HEADER_LEN,
            available: data.len(),
        });
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&data[..FRAME_HEADER_LEN]);
    let len = frame_len(header)?;
    let end = FRAME_HEADER_LEN + len;
    if data.len() < end {
        return Err(ProtocolError::Incomplete {
            needed: end,
            available: data.len(),
        });
    }
    let value = decode_payload(&data[FRAME_HEADER_LEN..end])?;
    Ok((value, end))
}

/// Encode an envelope as a frame payload (no header; the transport frames it).
pub fn encode_envelope(envelope: &AuthenticatedMessage) -> Result<Vec<u8>, ProtocolError> {
    encode_payload(envelope)
}

/// Decode an envelope from a frame payload.
pub fn decode_envelope(payload: &[u8]) -> Result<AuthenticatedMessage, ProtocolError> {
    decode_payload(payload)
}

/// Encoded size of a message, used as its cost in byte-mode flow control.
pub fn message_size(message: &OverlayMessage) -> u64 {
    // Only fails when the size limit is exceeded, which an in-memory message
    // of that size would already have hit on the wire.
    options()
        .serialized_size(message)
        .unwrap_or(MAX_MESSAGE_SIZE as u64)
}

/// Encoded size of a TRANSACTION message carrying `payload_len` bytes.
pub fn transaction_message_size(payload_len: u64) -> u64 {
    let empty = OverlayMessage::Transaction(TransactionEnvelope {
        payload: Vec::new(),
    });
    message_size(&empty).saturating_add(payload_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_messages::{FloodDemand, SendMore};
    use peerlink_types::Hash256;

    #[test]
    fn framed_roundtrip_reports_consumed_bytes() {
        let msg = OverlayMessage::SendMore(SendMore { num_messages: 40 });
        let bytes = encode(&msg).unwrap();
        let (decoded, used): (OverlayMessage, usize) = decode_framed(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn short_header_is_incomplete() {
        let err = decode_framed::<u64>(&[0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::Incomplete { needed: 4, .. }));
    }

    #[test]
    fn oversized_header_rejected() {
        let header = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        assert!(matches!(
            frame_len(header),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = encode_payload(&7u64).unwrap();
        payload.push(0);
        assert!(decode_payload::<u64>(&payload).is_err());
    }

    #[test]
    fn envelope_roundtrip() {
        let env = AuthenticatedMessage {
            sequence: 9,
            mac: [1u8; 32],
            message: OverlayMessage::GetPeers,
        };
        let payload = encode_envelope(&env).unwrap();
        assert_eq!(decode_envelope(&payload).unwrap(), env);
    }

    #[test]
    fn message_size_grows_with_payload() {
        let small = OverlayMessage::FloodDemand(FloodDemand {
            tx_hashes: vec![Hash256::new([1u8; 32])],
        });
        let large = OverlayMessage::FloodDemand(FloodDemand {
            tx_hashes: vec![Hash256::new([1u8; 32]); 10],
        });
        assert_eq!(message_size(&large) - message_size(&small), 9 * 32);
    }
}
