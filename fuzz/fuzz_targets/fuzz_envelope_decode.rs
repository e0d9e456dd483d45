#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink_protocol::codec::{decode_envelope, encode_envelope, message_size};

// Whatever a remote sends as a frame payload must decode or fail cleanly.
// Anything that decodes must re-encode to the same bytes.
fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = decode_envelope(data) else {
        return;
    };
    let encoded = encode_envelope(&envelope).expect("decoded envelope re-encodes");
    assert_eq!(encoded, data);
    let _ = message_size(&envelope.message);
    let _ = envelope.message.message_type().as_str();
});
