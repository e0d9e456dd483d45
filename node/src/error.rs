use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] peerlink_network::NetworkError),

    #[error("protocol error: {0}")]
    Protocol(#[from] peerlink_protocol::ProtocolError),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid peer address {0:?}")]
    BadAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node not started")]
    NotStarted,

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
