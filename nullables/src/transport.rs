//! Nullable transport: records frames instead of writing them.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};

use parking_lot::Mutex;
use peerlink_messages::AuthenticatedMessage;
use peerlink_network::{DropMode, PeerTransport};
use peerlink_protocol::codec::{decode_envelope, FRAME_HEADER_LEN};
use tokio::time::Instant;

#[derive(Default)]
struct State {
    /// Every frame ever sent, for assertions.
    sent: Vec<Vec<u8>>,
    /// Frames not yet delivered to the other side.
    outbox: VecDeque<Vec<u8>>,
    paused: bool,
    closed: Option<DropMode>,
    oldest_pending_write: Option<Instant>,
}

pub struct NullTransport {
    remote_ip: IpAddr,
    state: Mutex<State>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::with_remote_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn with_remote_ip(remote_ip: IpAddr) -> Self {
        Self {
            remote_ip,
            state: Mutex::new(State::default()),
        }
    }

    /// All frames sent so far, header included.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// All envelopes sent so far, decoded.
    pub fn sent(&self) -> Vec<AuthenticatedMessage> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|frame| decode_envelope(&frame[FRAME_HEADER_LEN..]).ok())
            .collect()
    }

    /// Pop the next undelivered frame payload (header stripped).
    pub fn take_outgoing(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .outbox
            .pop_front()
            .map(|frame| frame[FRAME_HEADER_LEN..].to_vec())
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn closed(&self) -> Option<DropMode> {
        self.state.lock().closed
    }

    /// Pretend the socket has had unwritten data since `since`.
    pub fn set_oldest_pending_write(&self, since: Option<Instant>) {
        self.state.lock().oldest_pending_write = since;
    }

    /// Forget recorded frames (the outbox is left alone).
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTransport for NullTransport {
    fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    fn send_frame(&self, frame: Vec<u8>) {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return;
        }
        state.sent.push(frame.clone());
        state.outbox.push_back(frame);
    }

    fn pause_reading(&self) {
        self.state.lock().paused = true;
    }

    fn resume_reading(&self) {
        self.state.lock().paused = false;
    }

    fn oldest_pending_write(&self) -> Option<Instant> {
        self.state.lock().oldest_pending_write
    }

    fn close(&self, mode: DropMode) {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return;
        }
        if mode == DropMode::IgnoreWriteQueue {
            state.outbox.clear();
        }
        state.closed = Some(mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_mode_discards_outbox() {
        let transport = NullTransport::new();
        transport.send_frame(vec![0, 0, 0, 1, 9]);
        transport.close(DropMode::IgnoreWriteQueue);
        assert!(transport.take_outgoing().is_none());
        assert_eq!(transport.sent_frames().len(), 1);
    }

    #[test]
    fn flush_mode_keeps_outbox() {
        let transport = NullTransport::new();
        transport.send_frame(vec![0, 0, 0, 1, 9]);
        transport.close(DropMode::FlushWriteQueue);
        assert_eq!(transport.take_outgoing(), Some(vec![9]));
        transport.send_frame(vec![0, 0, 0, 1, 7]);
        assert!(transport.take_outgoing().is_none());
    }
}
