#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use peerlink_messages::{OverlayMessage, SendMore, SendMoreExtended, TransactionEnvelope};
use peerlink_network::{CapacityMode, FlowControl, OverlayConfig};

#[derive(Arbitrary, Debug)]
enum Step {
    Grant { extended: bool, messages: u32, bytes: u32 },
    Send { size: u16 },
    Receive { size: u16, flood: bool, release: bool },
}

#[derive(Arbitrary, Debug)]
struct Input {
    bytes_mode: bool,
    steps: Vec<Step>,
}

// Grants, sends and receives in any order keep the capacity accounting
// consistent; FlowControl asserts its own invariants on every change.
fuzz_target!(|input: Input| {
    let config = OverlayConfig::default();
    let mode = if input.bytes_mode {
        CapacityMode::Bytes
    } else {
        CapacityMode::Messages
    };
    let mut fc = FlowControl::new(mode, &config, None);
    let mut held = Vec::new();
    let mut now = tokio::time::Instant::now();

    for step in input.steps.into_iter().take(256) {
        match step {
            Step::Grant {
                extended,
                messages,
                bytes,
            } => {
                let grant = if extended {
                    OverlayMessage::SendMoreExtended(SendMoreExtended {
                        num_messages: messages,
                        num_bytes: bytes,
                    })
                } else {
                    OverlayMessage::SendMore(SendMore {
                        num_messages: messages,
                    })
                };
                let _ = fc.receive_grant(&grant);
            }
            Step::Send { size } => {
                let tx = OverlayMessage::Transaction(TransactionEnvelope {
                    payload: vec![0; usize::from(size)],
                });
                fc.enqueue(tx, u64::from(size) + 16);
                let _ = fc.take_sendable(now);
            }
            Step::Receive {
                size,
                flood,
                release,
            } => {
                if let Ok(charge) = fc.lock_local_capacity(u64::from(size), flood) {
                    if release {
                        let _ = fc.release_local_capacity(charge);
                    } else {
                        held.push(charge);
                    }
                }
            }
        }
        now += std::time::Duration::from_millis(1);
    }
    for charge in held {
        let _ = fc.release_local_capacity(charge);
    }
    let snapshot = fc.snapshot();
    assert_eq!(snapshot.local_capacity, snapshot.local_limits);
});
