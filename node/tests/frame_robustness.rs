//! Property tests: garbage or unauthenticated input from a remote always ends
//! the connection, and never panics.

use peerlink_messages::{AuthenticatedMessage, OverlayMessage};
use peerlink_network::PeerState;
use peerlink_nullables::{LoopbackPair, TestNode};
use peerlink_protocol::codec::encode_envelope;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("test runtime")
}

fn arb_message() -> impl Strategy<Value = OverlayMessage> {
    prop_oneof![
        Just(OverlayMessage::GetPeers),
        any::<u32>().prop_map(OverlayMessage::GetScpState),
        any::<[u8; 32]>().prop_map(|h| OverlayMessage::GetTxSet(h.into())),
        proptest::collection::vec(any::<u8>(), 0..256).prop_map(|payload| {
            OverlayMessage::Transaction(peerlink_messages::TransactionEnvelope { payload })
        }),
        any::<u32>().prop_map(|n| {
            OverlayMessage::SendMore(peerlink_messages::SendMore { num_messages: n })
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_bytes_before_handshake(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let rt = runtime();
        let _guard = rt.enter();
        let pair = LoopbackPair::connect(TestNode::new(1), TestNode::new(2));
        pair.b_peer.lock().submit(&payload);
        prop_assert_eq!(pair.b_peer.lock().state(), PeerState::Closing);
    }

    #[test]
    fn unsealed_messages_after_handshake_drop_the_peer(message in arb_message()) {
        let rt = runtime();
        let _guard = rt.enter();
        let mut pair = LoopbackPair::authenticated();
        let payload = encode_envelope(&AuthenticatedMessage::unsealed(message)).unwrap();
        pair.b_peer.lock().submit(&payload);
        pair.pump();
        prop_assert_eq!(pair.b_peer.lock().state(), PeerState::Closing);
    }

    #[test]
    fn arbitrary_bytes_after_handshake(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let rt = runtime();
        let _guard = rt.enter();
        let mut pair = LoopbackPair::authenticated();
        pair.b_peer.lock().submit(&payload);
        pair.pump();
        prop_assert_eq!(pair.b_peer.lock().state(), PeerState::Closing);
    }
}
