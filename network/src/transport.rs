//! The byte pipe underneath a peer.

use std::net::IpAddr;

use serde::Serialize;
use tokio::time::Instant;

/// Whether queued outbound frames are written before the socket closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DropMode {
    FlushWriteQueue,
    IgnoreWriteQueue,
}

/// Socket-side operations a peer needs. Implementations must not call back
/// into the peer synchronously.
pub trait PeerTransport: Send + Sync {
    fn remote_ip(&self) -> IpAddr;

    /// Queue one length-prefixed frame for writing.
    fn send_frame(&self, frame: Vec<u8>);

    /// Stop delivering inbound frames until [`resume_reading`](Self::resume_reading).
    fn pause_reading(&self);
    fn resume_reading(&self);

    /// Enqueue time of the oldest frame not yet written, if any.
    fn oldest_pending_write(&self) -> Option<Instant>;

    fn close(&self, mode: DropMode);
}
