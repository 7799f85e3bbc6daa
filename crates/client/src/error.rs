//! Error types for the openrelay-client crate.
//!
//! One enum per collaborator seam (session layer, store, transport,
//! credentials) plus [`DispatchError`], the taxonomy observers see in
//! error entries. All variants are cloneable so entries can be both
//! logged on the message and handed to observers.

use serde_json::Value;
use thiserror::Error;

use openrelay_wire::addrs::Address;

/// Errors from the session layer (session builder and per-device ciphers).
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The fetched bundle's identity key conflicts with the identity stored
    /// for the address. Carries the newly fetched key; building the session
    /// requires explicit acceptance of the change.
    #[error("identity key does not match the stored identity")]
    UntrustedIdentity { identity_key: Vec<u8> },

    /// Any other failure inside the underlying protocol library.
    #[error("session operation failed: {0}")]
    Protocol(String),
}

/// Errors from the session store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),
}

/// Errors from the signal transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Non-2xx protocol response. `response` holds the parsed JSON body
    /// when the server sent one (the 409/410 device payloads arrive here).
    #[error("protocol error (status {code})")]
    Protocol { code: u16, response: Option<Value> },

    /// Connection-level failure. Callers treat these as retriable later.
    #[error("network error: {0}")]
    Network(String),

    /// No usable credential for authenticating the request.
    #[error("credential error: {0}")]
    Credential(String),
}

impl TransportError {
    /// Status code for protocol errors, `None` otherwise.
    pub fn code(&self) -> Option<u16> {
        match self {
            TransportError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors from the credential source.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("no credential available")]
    Missing,

    #[error("credential is not a decodable JWT: {0}")]
    Malformed(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

/// Failure taxonomy surfaced to dispatch observers.
///
/// A 404 on transmit arrives as [`DispatchError::UnregisteredUser`] so the
/// unregistered signal reaches observers undisturbed; every other cause is
/// carried by the variant matching its origin.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The server does not know the recipient address.
    #[error("recipient {addr} is not registered")]
    UnregisteredUser { addr: Address },

    /// Transmit rejected with a non-recoverable protocol status.
    #[error("message transmit rejected (status {code}): {detail}")]
    SendRejected { code: u16, detail: String },

    /// The recipient's identity key changed and the change was not accepted.
    #[error("identity key for {addr} has changed")]
    IdentityChanged { addr: Address, identity_key: Vec<u8> },

    /// Device-set reconciliation exceeded its retry bound.
    #[error("hit retry limit while reconciling devices for {addr}")]
    RetryLimit { addr: Address },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
