//! Errors raised when parsing fundamental types from text.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Decode a hex string into a fixed-size byte array.
pub(crate) fn decode_hex_array<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let bytes = hex::decode(s.trim()).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| TypesError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        })
}
