//! Message classification for dispatch and load shedding.

use peerlink_messages::MessageType;
use serde::Serialize;

/// How an inbound message is handled once it has passed the MAC check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MessageCategory {
    /// HELLO, AUTH: processed inline.
    Handshake,
    /// Peer lists, grants, errors.
    Control,
    /// Transactions, adverts, demands. Droppable, skipped while out of sync.
    TransactionFlood,
    /// Requests for consensus data. Droppable.
    ConsensusQuery,
    /// Consensus traffic and replies. Never dropped.
    Consensus,
}

impl MessageCategory {
    pub fn of(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::Hello | MessageType::Auth => Self::Handshake,
            MessageType::Error
            | MessageType::GetPeers
            | MessageType::Peers
            | MessageType::SendMore
            | MessageType::SendMoreExtended => Self::Control,
            MessageType::Transaction | MessageType::FloodAdvert | MessageType::FloodDemand => {
                Self::TransactionFlood
            }
            MessageType::GetTxSet | MessageType::GetScpQuorumSet | MessageType::GetScpState => {
                Self::ConsensusQuery
            }
            MessageType::DontHave
            | MessageType::TxSet
            | MessageType::ScpQuorumSet
            | MessageType::ScpMessage => Self::Consensus,
        }
    }

    /// Action type of the main-queue task that handles this category.
    pub fn action_type(self) -> ActionType {
        match self {
            Self::TransactionFlood | Self::ConsensusQuery => ActionType::Droppable,
            Self::Handshake | Self::Control | Self::Consensus => ActionType::Normal,
        }
    }
}

/// Scheduling class of a main-queue task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ActionType {
    Normal,
    Droppable,
}

/// Messages exempt from outbound shedding: the handshake and errors.
pub fn is_shedding_exempt(msg_type: MessageType) -> bool {
    matches!(
        msg_type,
        MessageType::Hello | MessageType::Auth | MessageType::Error
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_traffic_is_droppable() {
        for t in [
            MessageType::Transaction,
            MessageType::FloodAdvert,
            MessageType::FloodDemand,
        ] {
            assert_eq!(MessageCategory::of(t), MessageCategory::TransactionFlood);
            assert_eq!(MessageCategory::of(t).action_type(), ActionType::Droppable);
        }
    }

    #[test]
    fn consensus_is_never_droppable() {
        for t in [
            MessageType::ScpMessage,
            MessageType::TxSet,
            MessageType::ScpQuorumSet,
            MessageType::DontHave,
        ] {
            assert_eq!(MessageCategory::of(t).action_type(), ActionType::Normal);
        }
    }

    #[test]
    fn handshake_types() {
        assert_eq!(MessageCategory::of(MessageType::Hello), MessageCategory::Handshake);
        assert_eq!(MessageCategory::of(MessageType::Auth), MessageCategory::Handshake);
        assert_eq!(MessageCategory::of(MessageType::Error), MessageCategory::Control);
    }

    #[test]
    fn handshake_and_error_bypass_shedding() {
        assert!(is_shedding_exempt(MessageType::Hello));
        assert!(is_shedding_exempt(MessageType::Auth));
        assert!(is_shedding_exempt(MessageType::Error));
        assert!(!is_shedding_exempt(MessageType::Transaction));
        assert!(!is_shedding_exempt(MessageType::GetPeers));
    }
}
