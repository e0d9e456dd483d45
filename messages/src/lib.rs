//! Overlay wire message types.
//!
//! Every frame exchanged between two peers carries one
//! [`AuthenticatedMessage`]: a sequence number, a MAC and an
//! [`OverlayMessage`]. HELLO and ERROR travel with sequence 0 and a zero MAC.
//!
//! Application payloads (transactions, transaction sets, quorum sets,
//! consensus statements) are opaque byte blobs at this layer.

use std::net::IpAddr;

use peerlink_types::{Hash256, NetworkId, NodeId, Nonce, Signature, TxHash};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// AUTH flag requesting byte-denominated flow control.
pub const AUTH_MSG_FLAG_FLOW_CONTROL_BYTES_REQUESTED: u32 = 200;

/// Maximum number of hashes carried by one FLOOD_ADVERT or FLOOD_DEMAND.
pub const TX_ADVERT_VECTOR_MAX_SIZE: usize = 1000;
pub const TX_DEMAND_VECTOR_MAX_SIZE: usize = 1000;

/// Discriminant of every overlay message.
///
/// Classification and handler selection match on this exhaustively, so a
/// new variant fails to compile until every match handles it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Error,
    Hello,
    Auth,
    DontHave,
    GetPeers,
    Peers,
    GetTxSet,
    TxSet,
    Transaction,
    GetScpQuorumSet,
    ScpQuorumSet,
    ScpMessage,
    GetScpState,
    SendMore,
    SendMoreExtended,
    FloodAdvert,
    FloodDemand,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Hello => "HELLO",
            Self::Auth => "AUTH",
            Self::DontHave => "DONT_HAVE",
            Self::GetPeers => "GET_PEERS",
            Self::Peers => "PEERS",
            Self::GetTxSet => "GET_TX_SET",
            Self::TxSet => "TX_SET",
            Self::Transaction => "TRANSACTION",
            Self::GetScpQuorumSet => "GET_SCP_QUORUMSET",
            Self::ScpQuorumSet => "SCP_QUORUMSET",
            Self::ScpMessage => "SCP_MESSAGE",
            Self::GetScpState => "GET_SCP_STATE",
            Self::SendMore => "SEND_MORE",
            Self::SendMoreExtended => "SEND_MORE_EXTENDED",
            Self::FloodAdvert => "FLOOD_ADVERT",
            Self::FloodDemand => "FLOOD_DEMAND",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried by ERROR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unspecific error.
    Misc,
    /// Malformed data.
    Data,
    /// Misconfiguration (network, version, self-connection, duplicate).
    Conf,
    /// Authentication failure.
    Auth,
    /// The node is overloaded.
    Load,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Misc => "ERR_MISC",
            Self::Data => "ERR_DATA",
            Self::Conf => "ERR_CONF",
            Self::Auth => "ERR_AUTH",
            Self::Load => "ERR_LOAD",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: ErrorCode,
    pub msg: String,
}

/// Ephemeral X25519 key certified by the node's Ed25519 identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCert {
    pub pubkey: [u8; 32],
    /// Unix seconds after which the certificate is rejected.
    pub expiration: u64,
    pub sig: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub overlay_version: u32,
    pub overlay_min_version: u32,
    pub network_id: NetworkId,
    pub version_str: String,
    pub listening_port: u16,
    pub peer_id: NodeId,
    pub cert: AuthCert,
    pub nonce: Nonce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub flags: u32,
}

/// A peer's network address as exchanged in PEERS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", std::net::SocketAddr::new(self.ip, self.port))
    }
}

/// Negative answer to a GET_TX_SET or GET_SCP_QUORUMSET.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DontHave {
    pub msg_type: MessageType,
    pub req_hash: Hash256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSetMsg {
    pub hash: Hash256,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSetMsg {
    pub hash: Hash256,
    pub payload: Vec<u8>,
}

/// A consensus statement for one ledger slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpEnvelope {
    pub slot_index: u32,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub payload: Vec<u8>,
}

/// Message-count grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMore {
    pub num_messages: u32,
}

/// Grant used when byte-denominated flow control is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMoreExtended {
    pub num_messages: u32,
    pub num_bytes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodAdvert {
    #[serde(deserialize_with = "advert_hashes")]
    pub tx_hashes: Vec<TxHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodDemand {
    #[serde(deserialize_with = "demand_hashes")]
    pub tx_hashes: Vec<TxHash>,
}

fn advert_hashes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<TxHash>, D::Error> {
    bounded_hashes(deserializer, TX_ADVERT_VECTOR_MAX_SIZE)
}

fn demand_hashes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<TxHash>, D::Error> {
    bounded_hashes(deserializer, TX_DEMAND_VECTOR_MAX_SIZE)
}

/// Oversized hash vectors fail to decode, so they never reach a peer.
fn bounded_hashes<'de, D: Deserializer<'de>>(
    deserializer: D,
    max: usize,
) -> Result<Vec<TxHash>, D::Error> {
    let hashes = Vec::<TxHash>::deserialize(deserializer)?;
    if hashes.len() > max {
        let expected = format!("at most {max} hashes");
        return Err(D::Error::invalid_length(hashes.len(), &expected.as_str()));
    }
    Ok(hashes)
}

/// Every message exchanged on an overlay connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayMessage {
    Error(ErrorMsg),
    Hello(Hello),
    Auth(Auth),
    DontHave(DontHave),
    GetPeers,
    Peers(Vec<PeerAddress>),
    GetTxSet(Hash256),
    TxSet(TxSetMsg),
    Transaction(TransactionEnvelope),
    GetScpQuorumSet(Hash256),
    ScpQuorumSet(QuorumSetMsg),
    ScpMessage(ScpEnvelope),
    /// Ask for consensus state starting at the given ledger.
    GetScpState(u32),
    SendMore(SendMore),
    SendMoreExtended(SendMoreExtended),
    FloodAdvert(FloodAdvert),
    FloodDemand(FloodDemand),
}

impl OverlayMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Error(_) => MessageType::Error,
            Self::Hello(_) => MessageType::Hello,
            Self::Auth(_) => MessageType::Auth,
            Self::DontHave(_) => MessageType::DontHave,
            Self::GetPeers => MessageType::GetPeers,
            Self::Peers(_) => MessageType::Peers,
            Self::GetTxSet(_) => MessageType::GetTxSet,
            Self::TxSet(_) => MessageType::TxSet,
            Self::Transaction(_) => MessageType::Transaction,
            Self::GetScpQuorumSet(_) => MessageType::GetScpQuorumSet,
            Self::ScpQuorumSet(_) => MessageType::ScpQuorumSet,
            Self::ScpMessage(_) => MessageType::ScpMessage,
            Self::GetScpState(_) => MessageType::GetScpState,
            Self::SendMore(_) => MessageType::SendMore,
            Self::SendMoreExtended(_) => MessageType::SendMoreExtended,
            Self::FloodAdvert(_) => MessageType::FloodAdvert,
            Self::FloodDemand(_) => MessageType::FloodDemand,
        }
    }

    pub fn error(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::Error(ErrorMsg {
            code,
            msg: msg.into(),
        })
    }
}

/// The unit written to the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedMessage {
    pub sequence: u64,
    pub mac: [u8; 32],
    pub message: OverlayMessage,
}

impl AuthenticatedMessage {
    /// Wrap a message that travels without a MAC (HELLO, ERROR, and
    /// anything sent before keys exist).
    pub fn unsealed(message: OverlayMessage) -> Self {
        Self {
            sequence: 0,
            mac: [0u8; 32],
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_hello() -> Hello {
        Hello {
            overlay_version: 3,
            overlay_min_version: 1,
            network_id: NetworkId([1u8; 32]),
            version_str: "peerlink 0.1.0".into(),
            listening_port: 11625,
            peer_id: peerlink_types::PublicKey([2u8; 32]),
            cert: AuthCert {
                pubkey: [3u8; 32],
                expiration: 3600,
                sig: Signature([4u8; 64]),
            },
            nonce: Nonce([5u8; 32]),
        }
    }

    #[test]
    fn hello_envelope_roundtrip() {
        let env = AuthenticatedMessage::unsealed(OverlayMessage::Hello(sample_hello()));
        let bytes = bincode::serialize(&env).unwrap();
        let decoded: AuthenticatedMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.sequence, 0);
    }

    #[test]
    fn message_type_matches_variant() {
        let msg = OverlayMessage::FloodAdvert(FloodAdvert {
            tx_hashes: vec![Hash256::new([9u8; 32])],
        });
        assert_eq!(msg.message_type(), MessageType::FloodAdvert);
        assert_eq!(OverlayMessage::GetPeers.message_type().as_str(), "GET_PEERS");
    }

    #[test]
    fn error_helper_builds_error_msg() {
        let msg = OverlayMessage::error(ErrorCode::Load, "peer rejected");
        match msg {
            OverlayMessage::Error(e) => {
                assert_eq!(e.code, ErrorCode::Load);
                assert_eq!(e.msg, "peer rejected");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn peer_address_displays_as_socket_addr() {
        let addr = PeerAddress {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: 11625,
        };
        assert_eq!(addr.to_string(), "10.0.0.1:11625");
    }

    #[test]
    fn hash_vectors_are_bounded_on_decode() {
        let hashes = |n: usize| vec![Hash256::new([7u8; 32]); n];
        let advert = |n| OverlayMessage::FloodAdvert(FloodAdvert { tx_hashes: hashes(n) });
        let demand = |n| OverlayMessage::FloodDemand(FloodDemand { tx_hashes: hashes(n) });

        for full in [advert(TX_ADVERT_VECTOR_MAX_SIZE), demand(TX_DEMAND_VECTOR_MAX_SIZE)] {
            let bytes = bincode::serialize(&full).unwrap();
            assert_eq!(bincode::deserialize::<OverlayMessage>(&bytes).unwrap(), full);
        }
        for over in [advert(TX_ADVERT_VECTOR_MAX_SIZE + 1), demand(TX_DEMAND_VECTOR_MAX_SIZE + 1)] {
            let bytes = bincode::serialize(&over).unwrap();
            assert!(bincode::deserialize::<OverlayMessage>(&bytes).is_err());
        }
    }

    #[test]
    fn corrupt_bytes_rejected() {
        let garbage = vec![0xFFu8; 7];
        assert!(bincode::deserialize::<AuthenticatedMessage>(&garbage).is_err());
    }
}
