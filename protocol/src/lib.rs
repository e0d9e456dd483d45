//! Wire protocol: message framing, envelope encoding, handshake digests,
//! versioning.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod version;

pub use error::ProtocolError;
pub use version::{
    FIRST_VERSION_SUPPORTING_FLOW_CONTROL_IN_BYTES, OVERLAY_PROTOCOL_MIN_VERSION,
    OVERLAY_PROTOCOL_VERSION,
};
