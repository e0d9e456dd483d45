use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("encoding failed: {0}")]
    Encode(String),
}
