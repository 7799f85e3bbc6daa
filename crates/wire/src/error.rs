//! Error types for the openrelay-wire crate.

use thiserror::Error;

/// Errors that can occur while parsing wire-level values.
#[derive(Debug, Clone, Error)]
pub enum WireError {
    /// An `addr.deviceId` session key could not be parsed.
    #[error("invalid encoded address: {0}")]
    InvalidEncodedAddress(String),

    /// Base64 ciphertext content could not be decoded.
    #[error("invalid message content: {0}")]
    InvalidContent(String),
}
