//! TCP sockets underneath overlay peers.
//!
//! Each connection is split into a writer task, fed frames through an
//! unbounded channel, and a reader task that decodes the length prefix and
//! hands whole payloads to the peer. The peer never awaits; it talks to the
//! socket only through [`PeerTransport`].

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use peerlink_network::{DropDirection, DropMode, Peer, PeerHandle, PeerTransport};
use peerlink_protocol::codec::{frame_len, FRAME_HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Whether the reader may deliver frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadGate {
    Open,
    Paused,
    Closed,
}

enum WriteCommand {
    Frame(Vec<u8>),
    Close,
}

/// Write side of a peer socket, as seen by the peer.
pub struct TcpTransport {
    remote_ip: IpAddr,
    commands: mpsc::UnboundedSender<WriteCommand>,
    /// Enqueue instants of frames the writer has not finished yet.
    pending: Arc<Mutex<VecDeque<Instant>>>,
    /// Set by an abortive close; the writer discards whatever is queued.
    discard: Arc<AtomicBool>,
    gate: watch::Sender<ReadGate>,
}

/// Read side of a peer socket. Spawned once the peer exists.
pub struct TcpReader {
    read_half: OwnedReadHalf,
    gate: watch::Receiver<ReadGate>,
    transport: Weak<TcpTransport>,
}

impl TcpTransport {
    /// Split `stream` and start its writer task.
    pub fn new(stream: TcpStream, remote_ip: IpAddr) -> (Arc<Self>, TcpReader) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(ip = %remote_ip, error = %e, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let (commands, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let discard = Arc::new(AtomicBool::new(false));
        let (gate, gate_rx) = watch::channel(ReadGate::Open);

        tokio::spawn(write_loop(
            write_half,
            rx,
            Arc::clone(&pending),
            Arc::clone(&discard),
            remote_ip,
        ));

        let transport = Arc::new(Self {
            remote_ip,
            commands,
            pending,
            discard,
            gate,
        });
        let reader = TcpReader {
            read_half,
            gate: gate_rx,
            transport: Arc::downgrade(&transport),
        };
        (transport, reader)
    }

    fn set_gate(&self, next: ReadGate) {
        self.gate.send_if_modified(|gate| {
            if *gate == ReadGate::Closed || *gate == next {
                return false;
            }
            *gate = next;
            true
        });
    }
}

impl PeerTransport for TcpTransport {
    fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    fn send_frame(&self, frame: Vec<u8>) {
        if *self.gate.borrow() == ReadGate::Closed {
            return;
        }
        self.pending.lock().push_back(Instant::now());
        if self.commands.send(WriteCommand::Frame(frame)).is_err() {
            self.pending.lock().pop_back();
        }
    }

    fn pause_reading(&self) {
        self.set_gate(ReadGate::Paused);
    }

    fn resume_reading(&self) {
        self.set_gate(ReadGate::Open);
    }

    fn oldest_pending_write(&self) -> Option<Instant> {
        self.pending.lock().front().copied()
    }

    fn close(&self, mode: DropMode) {
        if mode == DropMode::IgnoreWriteQueue {
            self.discard.store(true, Ordering::Release);
            self.pending.lock().clear();
        }
        self.set_gate(ReadGate::Closed);
        let _ = self.commands.send(WriteCommand::Close);
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    pending: Arc<Mutex<VecDeque<Instant>>>,
    discard: Arc<AtomicBool>,
    remote_ip: IpAddr,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Frame(frame) => {
                if discard.load(Ordering::Acquire) {
                    continue;
                }
                let result = write_half.write_all(&frame).await;
                pending.lock().pop_front();
                if let Err(e) = result {
                    tracing::debug!(ip = %remote_ip, error = %e, "socket write failed");
                    break;
                }
            }
            WriteCommand::Close => break,
        }
    }
    let _ = write_half.shutdown().await;
    tracing::trace!(ip = %remote_ip, "writer finished");
}

impl TcpReader {
    /// Start delivering frames to `peer`. The task ends when the socket
    /// closes, the transport is closed, or the node shuts down. Socket
    /// errors and EOF drop the peer.
    pub fn spawn(self, peer: &PeerHandle, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let peer = Arc::downgrade(peer);
        tokio::spawn(self.read_loop(peer, shutdown_rx))
    }

    async fn read_loop(
        mut self,
        peer: Weak<Mutex<Peer>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let reason = loop {
            if !self.wait_until_open().await {
                return;
            }
            let payload = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return,
                _ = wait_closed(self.gate.clone()) => return,
                result = read_frame(&mut self.read_half) => result,
            };
            match payload {
                Ok(Some(payload)) => {
                    let Some(peer) = peer.upgrade() else { return };
                    peer.lock().submit(&payload);
                }
                Ok(None) => break "remote closed the connection".to_string(),
                Err(e) => break format!("read error: {e}"),
            }
        };

        if self.transport.upgrade().is_none() {
            return;
        }
        if let Some(peer) = peer.upgrade() {
            peer.lock().drop_connection(
                reason,
                DropDirection::RemoteDroppedUs,
                DropMode::IgnoreWriteQueue,
            );
        }
    }

    /// Block while paused. Returns `false` once the transport is closed.
    async fn wait_until_open(&mut self) -> bool {
        loop {
            let gate = *self.gate.borrow_and_update();
            match gate {
                ReadGate::Open => return true,
                ReadGate::Closed => return false,
                ReadGate::Paused => {
                    if self.gate.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

async fn wait_closed(mut gate: watch::Receiver<ReadGate>) {
    if gate.wait_for(|g| *g == ReadGate::Closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Read one length-prefixed frame. `Ok(None)` on clean EOF at a frame
/// boundary.
async fn read_frame(read_half: &mut OwnedReadHalf) -> std::io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match read_half.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = frame_len(header)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let mut payload = vec![0u8; len];
    read_half.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn frames_are_written_in_order() {
        let (client, server) = socket_pair().await;
        let (transport, _reader) = TcpTransport::new(client, IpAddr::from([127, 0, 0, 1]));
        transport.send_frame(peerlink_protocol::codec::frame(b"one"));
        transport.send_frame(peerlink_protocol::codec::frame(b"two"));

        let (mut read_half, _write_half) = server.into_split();
        assert_eq!(read_frame(&mut read_half).await.unwrap().unwrap(), b"one");
        assert_eq!(read_frame(&mut read_half).await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn flushing_close_writes_queue_then_eof() {
        let (client, server) = socket_pair().await;
        let (transport, _reader) = TcpTransport::new(client, IpAddr::from([127, 0, 0, 1]));
        transport.send_frame(peerlink_protocol::codec::frame(b"last words"));
        transport.close(DropMode::FlushWriteQueue);
        transport.send_frame(peerlink_protocol::codec::frame(b"too late"));

        let (mut read_half, _write_half) = server.into_split();
        assert_eq!(
            read_frame(&mut read_half).await.unwrap().unwrap(),
            b"last words"
        );
        assert!(read_frame(&mut read_half).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abortive_close_clears_pending_writes() {
        let (client, _server) = socket_pair().await;
        let (transport, _reader) = TcpTransport::new(client, IpAddr::from([127, 0, 0, 1]));
        transport.close(DropMode::IgnoreWriteQueue);
        assert!(transport.oldest_pending_write().is_none());
    }

    #[tokio::test]
    async fn oversized_header_is_invalid_data() {
        let (mut client, server) = socket_pair().await;
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let (mut read_half, _write_half) = server.into_split();
        let err = read_frame(&mut read_half).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
