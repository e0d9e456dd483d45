use thiserror::Error;

use crate::auth::AuthError;
use crate::flow_control::FlowControlError;
use crate::mac::MacError;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("protocol error: {0}")]
    Protocol(#[from] peerlink_protocol::ProtocolError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("message authentication failed: {0}")]
    Mac(#[from] MacError),

    #[error("flow control violation: {0}")]
    FlowControl(#[from] FlowControlError),

    #[error("invalid overlay config: {0}")]
    Config(String),
}
