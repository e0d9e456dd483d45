#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink_messages::AuthenticatedMessage;
use peerlink_protocol::codec::{decode_framed, frame_len, FRAME_HEADER_LEN, MAX_MESSAGE_SIZE};

// A byte stream from the socket: header validation then payload decoding.
fuzz_target!(|data: &[u8]| {
    if data.len() >= FRAME_HEADER_LEN {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&data[..FRAME_HEADER_LEN]);
        if let Ok(len) = frame_len(header) {
            assert!(len <= MAX_MESSAGE_SIZE);
        }
    }
    if let Ok((_, consumed)) = decode_framed::<AuthenticatedMessage>(data) {
        assert!(consumed <= data.len());
        assert!(consumed >= FRAME_HEADER_LEN);
    }
});
