use proptest::prelude::*;

use peerlink_messages::{AuthenticatedMessage, OverlayMessage, TransactionEnvelope};
use peerlink_protocol::codec;

proptest! {
    /// Decoding arbitrary bytes never panics.
    #[test]
    fn decode_envelope_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_envelope(&data);
        let _ = codec::decode_framed::<AuthenticatedMessage>(&data);
    }

    /// message_size equals the encoded payload length.
    #[test]
    fn message_size_matches_encoding(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let msg = OverlayMessage::Transaction(TransactionEnvelope { payload });
        let encoded = codec::encode_payload(&msg).unwrap();
        prop_assert_eq!(codec::message_size(&msg), encoded.len() as u64);
    }

    /// A frame split anywhere before its end reports Incomplete.
    #[test]
    fn truncated_frames_are_incomplete(payload in prop::collection::vec(any::<u8>(), 1..256), cut in 0usize..256) {
        let msg = OverlayMessage::Transaction(TransactionEnvelope { payload });
        let bytes = codec::encode(&msg).unwrap();
        let cut = cut % bytes.len();
        let result = codec::decode_framed::<OverlayMessage>(&bytes[..cut]);
        let is_incomplete = matches!(result, Err(peerlink_protocol::ProtocolError::Incomplete { .. }));
        prop_assert!(is_incomplete);
    }
}
